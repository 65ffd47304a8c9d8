use crate::core::errors::DeribitError;
use crate::core::kernel::{
    decode_response, HttpRequest, HttpTransport, JsonRpcRequest, ReqwestRest, RestClientConfig,
    RpcResult,
};
use crate::exchanges::deribit::auth::AuthSession;
use crate::exchanges::deribit::rpc::{RequestIds, RpcRequester};
use crate::exchanges::deribit::types::{AuthResult, API_PATH, METHOD_AUTH};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// JSON-RPC over HTTP with transparent re-authentication
///
/// Private calls carry `Authorization: Bearer <token>`. A reply with error
/// code 13009 invalidates the token, re-authenticates and resends the same
/// request, at most `max_auth_retries` times.
pub struct DeribitRest<T: HttpTransport = ReqwestRest> {
    transport: T,
    base_url: String,
    auth: Arc<AuthSession>,
    max_auth_retries: u32,
    ids: RequestIds,
}

impl DeribitRest<ReqwestRest> {
    /// Dispatcher over a reqwest client built from `config`
    pub fn with_config(
        config: &RestClientConfig,
        auth: Arc<AuthSession>,
    ) -> Result<Self, DeribitError> {
        let transport = ReqwestRest::new(config.clone())?;
        Ok(Self::new(transport, config, auth))
    }
}

impl<T: HttpTransport> DeribitRest<T> {
    pub fn new(transport: T, config: &RestClientConfig, auth: Arc<AuthSession>) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
            max_auth_retries: config.max_auth_retries,
            ids: RequestIds::new(),
        }
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/api/v2/{method}`
    pub fn endpoint(&self, method: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PATH, method)
    }

    /// Exchange the session credentials for a token pair over HTTP
    pub async fn authenticate(&self) -> Result<AuthResult, DeribitError> {
        self.auth.authenticate(self).await
    }

    /// Call `method` and return its raw `result`
    #[instrument(skip(self, params))]
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        private: bool,
    ) -> Result<Value, DeribitError> {
        if private && !self.auth.is_authenticated() {
            debug!("No access token held, authenticating first");
            self.auth.authenticate(self).await?;
        }

        let body = JsonRpcRequest::new(self.ids.next(), method, &params)
            .to_json()?
            .into_bytes();

        let mut retries = 0u32;
        loop {
            let bearer = if private {
                self.auth.access_token()
            } else {
                None
            };

            let error = match self.post(method, &body, bearer).await? {
                Ok(result) => return Ok(result),
                Err(e) => e.into_api_error(method),
            };
            if !error.is_unauthorized() || retries >= self.max_auth_retries {
                return Err(error);
            }

            retries += 1;
            warn!(
                attempt = retries,
                max_retries = self.max_auth_retries,
                "Access token rejected, re-authenticating"
            );
            self.auth.invalidate();
            self.auth.authenticate(self).await?;
        }
    }

    /// Call `method` and decode its `result` into `R`
    pub async fn send_json<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        private: bool,
    ) -> Result<R, DeribitError> {
        let value = self.send(method, params, private).await?;
        serde_json::from_value(value).map_err(|e| {
            DeribitError::DecodeError(format!("Invalid result for {}: {}", method, e))
        })
    }

    pub async fn public(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
        self.send(method, params, false).await
    }

    pub async fn private(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
        self.send(method, params, true).await
    }

    /// One HTTP exchange, decoded to a JSON-RPC outcome
    async fn post(
        &self,
        method: &str,
        body: &[u8],
        bearer: Option<String>,
    ) -> Result<RpcResult, DeribitError> {
        let url = self.endpoint(method);
        let mut request = HttpRequest::post_json(url.clone(), body.to_vec());
        if let Some(token) = bearer {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }
        let request_body = if method == METHOD_AUTH {
            "<redacted>".to_string()
        } else {
            request.body_text()
        };

        let response = self.transport.execute(request).await?;

        if !response.is_success() {
            warn!(status = response.status, url = %url, "HTTP request failed");
            return Err(DeribitError::HttpStatus {
                status: response.status,
                url,
                request_body,
                response_body: response.body,
            });
        }
        if response.body.trim().is_empty() {
            return Err(DeribitError::EmptyResponse {
                status: response.status,
            });
        }

        decode_response(&response.body)
    }
}

/// Single unauthenticated call, used for the `public/auth` exchange
#[async_trait]
impl<T: HttpTransport> RpcRequester for DeribitRest<T> {
    async fn request(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
        let body = JsonRpcRequest::new(self.ids.next(), method, &params)
            .to_json()?
            .into_bytes();
        self.post(method, &body, None)
            .await?
            .map_err(|e| e.into_api_error(method))
    }
}

impl<T: HttpTransport> std::fmt::Debug for DeribitRest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeribitRest")
            .field("base_url", &self.base_url)
            .field("max_auth_retries", &self.max_auth_retries)
            .finish_non_exhaustive()
    }
}
