use crate::core::config::{ConfigError, DeribitConfig};
use crate::core::errors::DeribitError;
use crate::core::kernel::{HmacSigner, Signer};
use crate::exchanges::deribit::rpc::RpcRequester;
use crate::exchanges::deribit::types::{AuthParams, AuthResult, GrantType, METHOD_AUTH};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use std::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// How `authenticate` proves the client's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    /// Client id and secret sent as-is
    #[default]
    ClientCredentials,
    /// HMAC-SHA256 signature over a timestamp and nonce; the secret never leaves the process
    ClientSignature,
}

/// API credentials, read-only after construction
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: Secret<String>,
    method: AuthMethod,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
            method: AuthMethod::default(),
        }
    }

    pub fn from_config(config: &DeribitConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            method: AuthMethod::default(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: AuthMethod) -> Self {
        self.method = method;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.expose_secret().is_empty()
    }

    /// Build `public/auth` parameters for the configured grant
    pub fn auth_params(&self) -> Result<AuthParams, DeribitError> {
        if !self.is_configured() {
            return Err(ConfigError::MissingCredentials(
                "API client_id and client_secret not configured".to_string(),
            )
            .into());
        }

        match self.method {
            AuthMethod::ClientCredentials => {
                let mut params = AuthParams::new(GrantType::ClientCredentials);
                params.client_id = Some(self.client_id.clone());
                params.client_secret = Some(self.client_secret.expose_secret().clone());
                Ok(params)
            }
            AuthMethod::ClientSignature => {
                let timestamp = chrono::Utc::now().timestamp_millis();
                let nonce: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(16)
                    .map(char::from)
                    .collect();
                let signature = HmacSigner::new(self.client_secret.clone())
                    .sign_auth(timestamp, &nonce, "")?;

                let mut params = AuthParams::new(GrantType::ClientSignature);
                params.client_id = Some(self.client_id.clone());
                params.timestamp = Some(timestamp);
                params.signature = Some(signature);
                params.nonce = Some(nonce);
                params.data = Some(String::new());
                Ok(params)
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Token pair from a successful `public/auth`
pub struct AuthTokens {
    access_token: Secret<String>,
    refresh_token: Secret<String>,
    pub expires_in: u64,
    pub obtained_at_ms: i64,
    pub scope: String,
}

impl AuthTokens {
    pub fn from_result(result: &AuthResult, obtained_at_ms: i64) -> Self {
        Self {
            access_token: Secret::new(result.access_token.clone()),
            refresh_token: Secret::new(result.refresh_token.clone()),
            expires_in: result.expires_in,
            obtained_at_ms,
            scope: result.scope.clone(),
        }
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.obtained_at_ms + (self.expires_in as i64 * 1000)
    }

    /// Expired or within 60 seconds of expiry
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms + 60_000 >= self.expires_at_ms()
    }
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("expires_in", &self.expires_in)
            .field("obtained_at_ms", &self.obtained_at_ms)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Current access/refresh tokens for one logical connection
///
/// Shared by handle (`Arc<AuthSession>`) between the HTTP dispatcher and the
/// WebSocket session. Tokens only change through [`AuthSession::authenticate`],
/// [`AuthSession::refresh`] and [`AuthSession::invalidate`]; concurrent
/// attempts are serialized so at most one exchange is in flight.
#[derive(Debug)]
pub struct AuthSession {
    credentials: Credentials,
    tokens: RwLock<Option<AuthTokens>>,
    attempt: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            tokens: RwLock::new(None),
            attempt: tokio::sync::Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Exchange credentials for a token pair
    #[instrument(skip(self, rpc), fields(client_id = %self.credentials.client_id))]
    pub async fn authenticate(&self, rpc: &dyn RpcRequester) -> Result<AuthResult, DeribitError> {
        let params = self.credentials.auth_params()?;
        let _attempt = self.attempt.lock().await;
        self.exchange(rpc, params).await
    }

    /// Exchange the held refresh token for a new token pair
    #[instrument(skip(self, rpc), fields(client_id = %self.credentials.client_id))]
    pub async fn refresh(&self, rpc: &dyn RpcRequester) -> Result<AuthResult, DeribitError> {
        let _attempt = self.attempt.lock().await;

        let refresh_token = self
            .read_tokens(|tokens| tokens.refresh_token.expose_secret().clone())
            .ok_or_else(|| DeribitError::auth(None, "No refresh token held"))?;

        let mut params = AuthParams::new(GrantType::RefreshToken);
        params.refresh_token = Some(refresh_token);
        self.exchange(rpc, params).await
    }

    /// Forget the current tokens
    pub fn invalidate(&self) {
        if let Ok(mut tokens) = self.tokens.write() {
            *tokens = None;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_tokens(|_| ()).is_some()
    }

    /// Bearer credential for private calls (use carefully - exposes secret)
    pub fn access_token(&self) -> Option<String> {
        self.read_tokens(|tokens| tokens.access_token.expose_secret().clone())
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.read_tokens(|tokens| tokens.expires_in)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.read_tokens(|tokens| tokens.is_expired(now_ms))
            .unwrap_or(true)
    }

    fn read_tokens<T>(&self, f: impl FnOnce(&AuthTokens) -> T) -> Option<T> {
        self.tokens.read().ok().and_then(|tokens| tokens.as_ref().map(f))
    }

    async fn exchange(
        &self,
        rpc: &dyn RpcRequester,
        params: AuthParams,
    ) -> Result<AuthResult, DeribitError> {
        let grant_type = params.grant_type;
        debug!(?grant_type, "Sending authentication request");

        let value = serde_json::to_value(&params)?;
        let result = match rpc.request(METHOD_AUTH, value).await {
            Ok(result) => result,
            Err(DeribitError::ApiError { code, message, .. }) => {
                warn!(code, %message, ?grant_type, "Authentication rejected");
                return Err(DeribitError::auth(Some(code), message));
            }
            Err(e) => return Err(e),
        };

        let auth_result: AuthResult = serde_json::from_value(result).map_err(|e| {
            DeribitError::DecodeError(format!("Invalid authentication response: {}", e))
        })?;

        let tokens = AuthTokens::from_result(&auth_result, chrono::Utc::now().timestamp_millis());
        if let Ok(mut slot) = self.tokens.write() {
            *slot = Some(tokens);
        }

        info!(
            scope = %auth_result.scope,
            expires_in = auth_result.expires_in,
            "Authentication successful"
        );
        Ok(auth_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Replies to `public/auth` from a script and records the params it saw
    struct ScriptedAuth {
        replies: Mutex<Vec<Result<Value, DeribitError>>>,
        seen: Mutex<Vec<Value>>,
    }

    impl ScriptedAuth {
        fn new(replies: Vec<Result<Value, DeribitError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcRequester for ScriptedAuth {
        async fn request(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
            assert_eq!(method, METHOD_AUTH);
            self.seen.lock().unwrap().push(params);
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn tokens(access: &str, refresh: &str) -> Value {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 900,
            "scope": "connection",
            "token_type": "bearer"
        })
    }

    #[tokio::test]
    async fn test_authenticate_stores_tokens() {
        let session = AuthSession::new(Credentials::new("id", "secret"));
        let rpc = ScriptedAuth::new(vec![Ok(tokens("at1", "rt1"))]);

        assert!(!session.is_authenticated());
        let result = session.authenticate(&rpc).await.unwrap();

        assert_eq!(result.access_token, "at1");
        assert!(session.is_authenticated());
        assert_eq!(session.access_token().as_deref(), Some("at1"));

        let seen = rpc.seen.lock().unwrap();
        assert_eq!(seen[0]["grant_type"], "client_credentials");
        assert_eq!(seen[0]["client_id"], "id");
        assert_eq!(seen[0]["client_secret"], "secret");
    }

    #[tokio::test]
    async fn test_refresh_uses_refresh_token() {
        let session = AuthSession::new(Credentials::new("id", "secret"));
        let rpc = ScriptedAuth::new(vec![Ok(tokens("at1", "rt1")), Ok(tokens("at2", "rt2"))]);

        session.authenticate(&rpc).await.unwrap();
        session.refresh(&rpc).await.unwrap();

        assert_eq!(session.access_token().as_deref(), Some("at2"));
        let seen = rpc.seen.lock().unwrap();
        assert_eq!(seen[1], json!({"grant_type": "refresh_token", "refresh_token": "rt1"}));
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails() {
        let session = AuthSession::new(Credentials::new("id", "secret"));
        let rpc = ScriptedAuth::new(vec![]);

        let err = session.refresh(&rpc).await.unwrap_err();
        assert!(matches!(err, DeribitError::AuthError { code: None, .. }));
    }

    #[tokio::test]
    async fn test_remote_rejection_becomes_auth_error() {
        let session = AuthSession::new(Credentials::new("id", "wrong"));
        let rpc = ScriptedAuth::new(vec![Err(DeribitError::ApiError {
            method: METHOD_AUTH.to_string(),
            code: 13004,
            message: "invalid_credentials".to_string(),
        })]);

        let err = session.authenticate(&rpc).await.unwrap_err();
        match err {
            DeribitError::AuthError { code, message } => {
                assert_eq!(code, Some(13004));
                assert_eq!(message, "invalid_credentials");
            }
            other => panic!("Expected auth error, got {:?}", other),
        }
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_network() {
        let session = AuthSession::new(Credentials::new("", ""));
        let rpc = ScriptedAuth::new(vec![]);

        let err = session.authenticate(&rpc).await.unwrap_err();
        assert!(matches!(err, DeribitError::ConfigError(_)));
        assert!(rpc.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_clears_tokens() {
        let session = AuthSession::new(Credentials::new("id", "secret"));
        let rpc = ScriptedAuth::new(vec![Ok(tokens("at", "rt"))]);
        session.authenticate(&rpc).await.unwrap();

        session.invalidate();
        assert!(!session.is_authenticated());
        assert!(session.access_token().is_none());
    }

    #[test]
    fn test_client_signature_params() {
        let params = Credentials::new("id", "secret")
            .with_method(AuthMethod::ClientSignature)
            .auth_params()
            .unwrap();

        assert_eq!(params.grant_type, GrantType::ClientSignature);
        assert!(params.client_secret.is_none());
        assert_eq!(params.nonce.as_ref().map(String::len), Some(16));
        assert_eq!(params.signature.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_token_expiry_margin() {
        let result = AuthResult {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_in: 900,
            scope: String::new(),
            token_type: "bearer".to_string(),
            enabled_features: Vec::new(),
            sid: None,
            state: None,
        };
        let tokens = AuthTokens::from_result(&result, 0);

        assert!(!tokens.is_expired(0));
        assert!(!tokens.is_expired(839_999));
        assert!(tokens.is_expired(840_000));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let credentials = Credentials::new("id", "very-secret");
        assert!(!format!("{:?}", credentials).contains("very-secret"));
    }
}
