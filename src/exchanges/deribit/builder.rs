use crate::core::config::DeribitConfig;
use crate::core::errors::DeribitError;
use crate::core::kernel::{ReqwestRest, RestClientConfig, TungsteniteConnector, WsConfig};
use crate::exchanges::deribit::auth::{AuthMethod, AuthSession, Credentials};
use crate::exchanges::deribit::rest::DeribitRest;
use crate::exchanges::deribit::session::{DeribitWsClient, SessionConfig};
use std::sync::Arc;

/// Turns a [`DeribitConfig`] into ready-to-use clients
///
/// Clients built from the same builder share one [`AuthSession`], so a token
/// obtained over HTTP is reused by the WebSocket session and vice versa.
#[derive(Debug, Clone)]
pub struct DeribitBuilder {
    config: DeribitConfig,
    rest: RestClientConfig,
    ws: WsConfig,
    session: SessionConfig,
    auth: Arc<AuthSession>,
}

impl DeribitBuilder {
    pub fn new(config: DeribitConfig) -> Self {
        let auth = Arc::new(AuthSession::new(Credentials::from_config(&config)));
        let rest = RestClientConfig::new(config.rest_base_url());
        Self {
            config,
            rest,
            ws: WsConfig::default(),
            session: SessionConfig::default(),
            auth,
        }
    }

    /// Authenticate with `client_signature` instead of sending the secret
    #[must_use]
    pub fn with_auth_method(mut self, method: AuthMethod) -> Self {
        let credentials = Credentials::from_config(&self.config).with_method(method);
        self.auth = Arc::new(AuthSession::new(credentials));
        self
    }

    #[must_use]
    pub fn with_rest_config(mut self, rest: RestClientConfig) -> Self {
        self.rest = rest;
        self
    }

    #[must_use]
    pub fn with_ws_config(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    #[must_use]
    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// WebSocket URL the session will connect to
    pub fn websocket_url(&self) -> String {
        self.config.websocket_url()
    }

    /// HTTP dispatcher over reqwest
    pub fn build_rest(&self) -> Result<DeribitRest<ReqwestRest>, DeribitError> {
        DeribitRest::with_config(&self.rest, self.auth.clone())
    }

    /// WebSocket session over tokio-tungstenite; call `connect` with [`Self::websocket_url`]
    pub fn build_ws(&self) -> DeribitWsClient {
        DeribitWsClient::new(
            Arc::new(TungsteniteConnector::new(self.ws.clone())),
            self.auth.clone(),
            self.session.clone(),
        )
    }
}
