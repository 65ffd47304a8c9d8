use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeribitError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Remote JSON-RPC `error` object
    #[error("API error on {method}: {code} - {message}")]
    ApiError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Authentication error: {message}")]
    AuthError { code: Option<i64>, message: String },

    /// Non-2xx HTTP status, carries both bodies for diagnostics
    #[error("Request to {url} failed with status {status}: request body: {request_body}, response body: {response_body}")]
    HttpStatus {
        status: u16,
        url: String,
        request_body: String,
        response_body: String,
    },

    #[error("Unexpected empty response body with status code {status}")]
    EmptyResponse { status: u16 },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("WebSocket not connected")]
    NotConnected,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Session lost after {attempts} reconnection attempts: {reason}")]
    SessionLost { attempts: u32, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

impl DeribitError {
    /// Build an auth error from a remote JSON-RPC error
    pub fn auth(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::AuthError {
            code,
            message: message.into(),
        }
    }

    /// Remote code 13009: access token invalid or expired
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::ApiError { code, .. } | Self::AuthError { code: Some(code), .. }
                if *code == crate::exchanges::deribit::types::UNAUTHORIZED_CODE
        )
    }

    /// Transport-level failures, recoverable by reconnecting a WebSocket session
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::ConnectionClosed(_)
                | Self::NotConnected
                | Self::Timeout(_)
                | Self::HttpError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_detection() {
        let err = DeribitError::ApiError {
            method: "private/get_positions".to_string(),
            code: 13009,
            message: "unauthorized".to_string(),
        };
        assert!(err.is_unauthorized());
        assert!(!err.is_transport());

        let other = DeribitError::ApiError {
            method: "private/buy".to_string(),
            code: 10009,
            message: "not_enough_funds".to_string(),
        };
        assert!(!other.is_unauthorized());
    }

    #[test]
    fn test_transport_classification() {
        assert!(DeribitError::NetworkError("reset".to_string()).is_transport());
        assert!(DeribitError::NotConnected.is_transport());
        assert!(!DeribitError::auth(Some(13004), "invalid_credentials").is_transport());
        assert!(!DeribitError::EmptyResponse { status: 200 }.is_transport());
    }
}
