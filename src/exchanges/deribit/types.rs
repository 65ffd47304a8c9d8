use crate::core::kernel::RpcResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Remote error code for an invalid or expired access token
pub const UNAUTHORIZED_CODE: i64 = 13009;

pub const API_PATH: &str = "/api/v2";

pub const METHOD_AUTH: &str = "public/auth";
pub const METHOD_HELLO: &str = "public/hello";
pub const METHOD_SET_HEARTBEAT: &str = "public/set_heartbeat";
pub const METHOD_TEST: &str = "public/test";

/// Inbound notification methods
pub const NOTIFICATION_HEARTBEAT: &str = "heartbeat";
pub const NOTIFICATION_SUBSCRIPTION: &str = "subscription";

/// Whether calls require bearer-token authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Public,
    Private,
}

impl Scope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Scoped method name, e.g. `private/subscribe`
    pub fn method(self, name: &str) -> String {
        format!("{}/{}", self.as_str(), name)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `public/auth` grant types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    ClientSignature,
    RefreshToken,
}

/// `public/auth` parameters
#[derive(Debug, Clone, Serialize)]
pub struct AuthParams {
    pub grant_type: GrantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl AuthParams {
    pub fn new(grant_type: GrantType) -> Self {
        Self {
            grant_type,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            timestamp: None,
            signature: None,
            nonce: None,
            data: None,
            scope: None,
        }
    }
}

/// `public/auth` result
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HelloParams {
    pub client_name: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatParams {
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelsParams {
    pub channels: Vec<String>,
}

/// Heartbeat notification flavour from `params.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatType {
    /// Server expects a `public/test` reply
    TestRequest,
    /// Plain liveness notice
    Heartbeat,
    Unknown,
}

impl HeartbeatType {
    pub fn from_params(params: &Value) -> Self {
        match params.get("type").and_then(Value::as_str) {
            Some("test_request") => Self::TestRequest,
            Some("heartbeat") => Self::Heartbeat,
            _ => Self::Unknown,
        }
    }
}

/// Lifecycle of a WebSocket session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Live,
    Reconnecting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Caller-visible WebSocket traffic
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// Subscription push
    Subscription { channel: String, data: Value },
    /// Any other server notification
    Notification { method: String, params: Value },
    /// Response not claimed by an awaiting `call`
    Response { id: Option<u64>, result: RpcResult },
    /// Session re-established and subscriptions replayed
    Reconnected,
    /// Reconnection gave up; the session is closed
    SessionLost { attempts: u32, reason: String },
}
