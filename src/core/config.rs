use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

pub const DERIBIT_REST_URL: &str = "https://www.deribit.com";
pub const DERIBIT_TESTNET_REST_URL: &str = "https://test.deribit.com";
pub const DERIBIT_WS_HOST: &str = "www.deribit.com";
pub const DERIBIT_TESTNET_WS_HOST: &str = "test.deribit.com";
pub const DERIBIT_WS_PATH: &str = "/ws/api/v2";

#[derive(Debug, Clone)]
pub struct DeribitConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub testnet: bool,
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for DeribitConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DeribitConfig", 5)?;
        state.serialize_field("client_id", &self.client_id)?;
        state.serialize_field("client_secret", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("rest_url", &self.rest_url)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for DeribitConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct DeribitConfigHelper {
            client_id: String,
            client_secret: String,
            #[serde(default)]
            testnet: bool,
            rest_url: Option<String>,
            ws_url: Option<String>,
        }

        let helper = DeribitConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            client_id: helper.client_id,
            client_secret: Secret::new(helper.client_secret),
            testnet: helper.testnet,
            rest_url: helper.rest_url,
            ws_url: helper.ws_url,
        })
    }
}

impl DeribitConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret: Secret::new(client_secret),
            testnet: false,
            rest_url: None,
            ws_url: None,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_CLIENT_ID` (e.g., `DERIBIT_CLIENT_ID`)
    /// - `{PREFIX}_CLIENT_SECRET`
    /// - `{PREFIX}_TESTNET` (optional, defaults to false)
    /// - `{PREFIX}_REST_URL` (optional)
    /// - `{PREFIX}_WS_URL` (optional, full URL or bare host)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let client_id_var = format!("{}_CLIENT_ID", prefix);
        let client_secret_var = format!("{}_CLIENT_SECRET", prefix);

        let client_id = env::var(&client_id_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(client_id_var))?;

        let client_secret = env::var(&client_secret_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(client_secret_var))?;

        let testnet = env::var(format!("{}_TESTNET", prefix))
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            client_id,
            client_secret: Secret::new(client_secret),
            testnet,
            rest_url: env::var(format!("{}_REST_URL", prefix)).ok(),
            ws_url: env::var(format!("{}_WS_URL", prefix)).ok(),
        })
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    ///
    /// A missing file is not an error; system environment variables are used instead.
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration for public-only usage (market data subscriptions)
    #[must_use]
    pub fn read_only() -> Self {
        Self::new(String::new(), String::new())
    }

    /// Check if this configuration has credentials for private calls
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.expose_secret().is_empty()
    }

    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    #[must_use]
    pub fn rest_url(mut self, rest_url: String) -> Self {
        self.rest_url = Some(rest_url);
        self
    }

    #[must_use]
    pub fn ws_url(mut self, ws_url: String) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    /// Base REST URL, without the `/api/v2` suffix
    pub fn rest_base_url(&self) -> String {
        self.rest_url.clone().unwrap_or_else(|| {
            if self.testnet {
                DERIBIT_TESTNET_REST_URL.to_string()
            } else {
                DERIBIT_REST_URL.to_string()
            }
        })
    }

    /// Full WebSocket URL; a bare host is expanded to `wss://{host}/ws/api/v2`
    pub fn websocket_url(&self) -> String {
        match &self.ws_url {
            Some(url) => expand_ws_url(url),
            None if self.testnet => expand_ws_url(DERIBIT_TESTNET_WS_HOST),
            None => expand_ws_url(DERIBIT_WS_HOST),
        }
    }

    /// Get client secret (use carefully - exposes secret)
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

pub fn expand_ws_url(url_or_host: &str) -> String {
    if url_or_host.starts_with("wss://") || url_or_host.starts_with("ws://") {
        url_or_host.to_string()
    } else {
        format!(
            "wss://{}{}",
            url_or_host.trim_end_matches('/'),
            DERIBIT_WS_PATH
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
