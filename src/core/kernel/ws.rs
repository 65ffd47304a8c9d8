use crate::core::errors::DeribitError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::instrument;

/// Write half of an open WebSocket
pub type WsSink = Pin<Box<dyn Sink<Message, Error = DeribitError> + Send>>;

/// Read half of an open WebSocket
pub type WsSource = Pin<Box<dyn Stream<Item = Result<Message, DeribitError>> + Send>>;

/// One open WebSocket connection, split into its two halves
pub struct WsHandle {
    pub sink: WsSink,
    pub source: WsSource,
}

impl WsHandle {
    pub fn new(sink: WsSink, source: WsSource) -> Self {
        Self { sink, source }
    }
}

impl std::fmt::Debug for WsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsHandle").finish_non_exhaustive()
    }
}

/// Opens WebSocket connections. The session never dials sockets itself.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<WsHandle, DeribitError>;
}

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

/// [`WsConnector`] backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    config: WsConfig,
}

impl TungsteniteConnector {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    #[instrument(skip(self), fields(url = %url))]
    async fn connect(&self, url: &str) -> Result<WsHandle, DeribitError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| DeribitError::Timeout("WebSocket connection timeout".to_string()))?
            .map_err(|e| {
                DeribitError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();

        let sink = write.sink_map_err(|e| {
            DeribitError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        });
        let source = read.map(|frame| {
            frame.map_err(|e| DeribitError::ConnectionClosed(format!("WebSocket error: {}", e)))
        });

        Ok(WsHandle::new(Box::pin(sink), Box::pin(source)))
    }
}

/// Bounded exponential backoff for session reconnection
///
/// The first attempt runs immediately; each later attempt waits for the next
/// delay, starting at `initial_delay` and doubling up to `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delays to wait before attempts 2..=max_attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2).factor(f) yields 2f, 4f, 8f, ...
        let factor = (self.initial_delay.as_millis() as u64 / 2).max(1);
        let with_jitter = self.jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(move |delay| if with_jitter { jitter(delay) } else { delay })
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}
