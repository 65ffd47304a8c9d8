use crate::core::config::expand_ws_url;
use crate::core::errors::DeribitError;
use crate::core::kernel::{Inbound, JsonRpcCodec, ReconnectPolicy, WsCodec, WsConnector, WsSink, WsSource};
use crate::exchanges::deribit::auth::AuthSession;
use crate::exchanges::deribit::heartbeat::HeartbeatResponder;
use crate::exchanges::deribit::rpc::{PendingRequests, RequestIds, RpcNotifier, RpcRequester};
use crate::exchanges::deribit::subscriptions::SubscriptionRegistry;
use crate::exchanges::deribit::types::{
    AuthResult, HelloParams, Scope, SessionState, WsMessage, METHOD_HELLO, METHOD_TEST,
    NOTIFICATION_HEARTBEAT, NOTIFICATION_SUBSCRIPTION,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, trace, warn};

/// WebSocket session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent with `public/hello`
    pub client_name: String,
    pub client_version: String,
    /// Seconds between server heartbeats
    pub heartbeat_interval: u64,
    /// How long `call` waits for a matching reply
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// `Private` authenticates on every (re)connect
    pub scope: Scope,
    /// Refresh the access token in the background at 80% of its lifetime
    pub token_refresh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval: 60,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            scope: Scope::Public,
            token_refresh: false,
        }
    }
}

impl SessionConfig {
    pub fn private() -> Self {
        Self {
            scope: Scope::Private,
            ..Self::default()
        }
    }

    pub fn with_client(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_token_refresh(mut self, enabled: bool) -> Self {
        self.token_refresh = enabled;
        self
    }
}

/// Long-lived Deribit WebSocket session
///
/// Owns one connection at a time and keeps it usable across drops: the
/// session announces itself, negotiates heartbeats, authenticates when
/// private and replays tracked subscriptions after every reconnect. Cheap to
/// clone; clones share the session.
///
/// ```rust,no_run
/// use deribit_rpc::core::kernel::{TungsteniteConnector, WsConfig};
/// use deribit_rpc::exchanges::deribit::{AuthSession, Credentials, DeribitWsClient, SessionConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), deribit_rpc::core::errors::DeribitError> {
/// let client = DeribitWsClient::new(
///     Arc::new(TungsteniteConnector::new(WsConfig::default())),
///     Arc::new(AuthSession::new(Credentials::new("", ""))),
///     SessionConfig::default(),
/// );
/// let mut messages = client.connect("test.deribit.com").await?;
/// client.subscribe(&["ticker.BTC-PERPETUAL.100ms".to_string()]).await?;
/// while let Some(message) = messages.recv().await {
///     println!("{:?}", message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeribitWsClient {
    inner: Arc<Inner>,
}

/// Open connection: the write half plus the task reading the other half
struct Connection {
    sink: WsSink,
    generation: u64,
    reader: JoinHandle<()>,
}

struct Inner {
    connector: Arc<dyn WsConnector>,
    codec: JsonRpcCodec,
    auth: Arc<AuthSession>,
    heartbeat: HeartbeatResponder,
    config: SessionConfig,
    writer: tokio::sync::Mutex<Option<Connection>>,
    generation: AtomicU64,
    subscriptions: tokio::sync::Mutex<SubscriptionRegistry>,
    pending: PendingRequests,
    /// Ids of internal fire-and-forget requests whose replies are swallowed
    internal: Mutex<HashSet<u64>>,
    ids: RequestIds,
    url: Mutex<Option<String>>,
    out: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    private: AtomicBool,
    started: AtomicBool,
    closed: AtomicBool,
    refresh_started: AtomicBool,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeribitWsClient {
    pub fn new(
        connector: Arc<dyn WsConnector>,
        auth: Arc<AuthSession>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let private = config.scope == Scope::Private;

        Self {
            inner: Arc::new(Inner {
                connector,
                codec: JsonRpcCodec,
                auth,
                heartbeat: HeartbeatResponder::new(config.heartbeat_interval),
                config,
                writer: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                subscriptions: tokio::sync::Mutex::new(SubscriptionRegistry::new()),
                pending: PendingRequests::new(),
                internal: Mutex::new(HashSet::new()),
                ids: RequestIds::new(),
                url: Mutex::new(None),
                out: Mutex::new(None),
                private: AtomicBool::new(private),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                refresh_started: AtomicBool::new(false),
                state,
                shutdown,
            }),
        }
    }

    /// Open the session and return the stream of caller-visible messages
    ///
    /// Accepts a full `wss://` URL or a bare host. On failure the transport
    /// is closed, the state returns to `Disconnected` and the client may
    /// connect again.
    #[instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn connect(
        &self,
        url: &str,
    ) -> Result<mpsc::UnboundedReceiver<WsMessage>, DeribitError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(DeribitError::SessionClosed);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(DeribitError::InvalidState(
                "Session already connected".to_string(),
            ));
        }

        let url = expand_ws_url(url);
        *lock(&inner.url) = Some(url.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&inner.out) = Some(tx);

        let established = match inner.establish(&url, inner.scope()).await {
            Ok(generation) => inner.go_live(generation, None).await,
            Err(e) => Err(e),
        };
        match established {
            Ok(()) => {
                info!(url = %url, "WebSocket session live");
                if inner.scope() == Scope::Private {
                    inner.start_token_refresh();
                }
                Ok(rx)
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to establish WebSocket session");
                inner.drop_connection().await;
                inner.pending.fail_all();
                lock(&inner.out).take();
                inner.set_state(SessionState::Disconnected);
                inner.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Track `channels` and subscribe to them
    ///
    /// The channels stay tracked even if the send fails, so the next replay
    /// picks them up. Before `connect` this only records the channels.
    #[instrument(skip(self, channels), fields(channel_count = channels.len()))]
    pub async fn subscribe(&self, channels: &[String]) -> Result<u64, DeribitError> {
        self.inner.ensure_open()?;
        let mut registry = self.inner.subscriptions.lock().await;
        registry
            .add(channels, self.inner.scope(), &*self.inner)
            .await
    }

    #[instrument(skip(self, channels), fields(channel_count = channels.len()))]
    pub async fn unsubscribe(&self, channels: &[String]) -> Result<u64, DeribitError> {
        self.inner.ensure_open()?;
        let mut registry = self.inner.subscriptions.lock().await;
        registry
            .remove(channels, self.inner.scope(), &*self.inner)
            .await
    }

    pub async fn unsubscribe_all(&self) -> Result<u64, DeribitError> {
        self.inner.ensure_open()?;
        let mut registry = self.inner.subscriptions.lock().await;
        registry.clear(self.inner.scope(), &*self.inner).await
    }

    /// Channels that will be replayed on reconnect
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().await.channels().to_vec()
    }

    /// Fire-and-forget request. The reply arrives as [`WsMessage::Response`].
    pub async fn send(&self, method: &str, params: Value) -> Result<u64, DeribitError> {
        self.inner.notify(method, params).await
    }

    /// Request and wait for the matching reply
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
        self.inner.request(method, params).await
    }

    pub async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, DeribitError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            DeribitError::DecodeError(format!("Invalid result for {}: {}", method, e))
        })
    }

    /// `public/test` round trip
    pub async fn ping(&self) -> Result<Value, DeribitError> {
        self.call(METHOD_TEST, serde_json::json!({})).await
    }

    /// Authenticate this connection; the session is private from now on
    pub async fn authenticate(&self) -> Result<AuthResult, DeribitError> {
        let result = self.inner.auth.authenticate(&*self.inner).await?;
        self.inner.private.store(true, Ordering::SeqCst);
        self.inner.start_token_refresh();
        Ok(result)
    }

    pub async fn refresh_auth(&self) -> Result<AuthResult, DeribitError> {
        self.inner.auth.refresh(&*self.inner).await
    }

    /// Send `public/test` every `period` until the session closes
    pub fn start_keepalive(&self, period: Duration) -> Result<JoinHandle<()>, DeribitError> {
        self.inner.ensure_open()?;
        let notifier: Arc<dyn RpcNotifier> = Arc::new(Internal(self.inner.clone()));
        Ok(HeartbeatResponder::spawn_keepalive(
            notifier,
            period,
            self.inner.shutdown.subscribe(),
        ))
    }

    /// Close the session for good. Reconnection never fires afterwards.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing WebSocket session");
        inner.set_state(SessionState::Closed);
        inner.drop_connection().await;
        inner.shutdown.send_replace(true);
        let failed = inner.pending.fail_all();
        if failed > 0 {
            debug!(failed, "Failed pending requests on close");
        }
        lock(&inner.out).take();
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.auth.is_authenticated()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn scope(&self) -> Scope {
        self.inner.scope()
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.inner.auth
    }
}

impl std::fmt::Debug for DeribitWsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeribitWsClient")
            .field("state", &self.state())
            .field("scope", &self.scope())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), DeribitError> {
        if self.is_closed() {
            return Err(DeribitError::SessionClosed);
        }
        Ok(())
    }

    fn scope(&self) -> Scope {
        if self.private.load(Ordering::SeqCst) {
            Scope::Private
        } else {
            Scope::Public
        }
    }

    /// `Closed` is final; later transitions are ignored
    fn set_state(&self, state: SessionState) {
        let mut previous = state;
        self.state.send_if_modified(|current| {
            if *current == state || *current == SessionState::Closed {
                return false;
            }
            previous = std::mem::replace(current, state);
            true
        });
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    /// Mark the session `Live` if connection `generation` is still current
    ///
    /// Runs under the writer lock, so a read loop ending concurrently either
    /// took the connection first (and this fails) or sees `Live` and
    /// reconnects.
    async fn go_live(&self, generation: u64, event: Option<WsMessage>) -> Result<(), DeribitError> {
        let writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(DeribitError::SessionClosed);
        }
        match writer.as_ref() {
            Some(current) if current.generation == generation => {
                self.set_state(SessionState::Live);
                if let Some(event) = event {
                    self.emit(event);
                }
                Ok(())
            }
            _ => Err(DeribitError::ConnectionClosed(
                "Connection lost during establishment".to_string(),
            )),
        }
    }

    fn emit(&self, message: WsMessage) {
        if let Some(out) = lock(&self.out).as_ref() {
            if out.send(message).is_err() {
                trace!("Message receiver dropped");
            }
        }
    }

    /// Open a connection and bring it to the point where it can go live
    ///
    /// Returns the generation of the connection it opened.
    async fn establish(self: &Arc<Self>, url: &str, scope: Scope) -> Result<u64, DeribitError> {
        self.set_state(SessionState::Connecting);
        let generation = self.open_connection(url).await?;

        let hello = serde_json::to_value(HelloParams {
            client_name: self.config.client_name.clone(),
            client_version: self.config.client_version.clone(),
        })?;
        self.request(METHOD_HELLO, hello).await?;
        self.heartbeat.negotiate(&**self).await?;

        if scope == Scope::Private {
            self.set_state(SessionState::Authenticating);
            self.auth.authenticate(&**self).await?;
        }

        self.set_state(SessionState::Subscribing);
        let registry = self.subscriptions.lock().await;
        registry.replay(scope, &Internal(self.clone())).await?;
        Ok(generation)
    }

    async fn open_connection(self: &Arc<Self>, url: &str) -> Result<u64, DeribitError> {
        let handle = self.connector.connect(url).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(url = %url, generation, "WebSocket connected");

        // Held while spawning so the reader never observes an empty slot
        let mut writer = self.writer.lock().await;
        let reader = tokio::spawn(read_loop(self.clone(), handle.source, generation));
        let previous = writer.replace(Connection {
            sink: handle.sink,
            generation,
            reader,
        });
        drop(writer);

        if let Some(stale) = previous {
            close_connection(stale).await;
        }
        Ok(generation)
    }

    /// Close whatever connection is current
    async fn drop_connection(&self) {
        let connection = self.writer.lock().await.take();
        if let Some(connection) = connection {
            close_connection(connection).await;
        }
    }

    async fn write(&self, id: u64, method: &str, params: &Value) -> Result<(), DeribitError> {
        let frame = self.codec.encode_request(id, method, params)?;
        self.write_frame(frame).await
    }

    async fn write_frame(&self, frame: Message) -> Result<(), DeribitError> {
        let mut writer = self.writer.lock().await;
        let connection = writer.as_mut().ok_or(DeribitError::NotConnected)?;
        connection.sink.send(frame).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
        internal: bool,
    ) -> Result<u64, DeribitError> {
        self.ensure_open()?;
        let id = self.ids.next();
        if internal {
            lock(&self.internal).insert(id);
        }
        trace!(id, method, "Sending request");
        if let Err(e) = self.write(id, method, &params).await {
            lock(&self.internal).remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    async fn handle_frame(self: &Arc<Self>, frame: Message) {
        let inbound = match self.codec.decode_message(frame) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::Notification { method, params } if method == NOTIFICATION_HEARTBEAT => {
                let internal = Internal(self.clone());
                if let Err(e) = self.heartbeat.on_heartbeat(&params, &internal).await {
                    warn!("Failed to answer heartbeat: {}", e);
                }
            }
            Inbound::Notification { method, params } if method == NOTIFICATION_SUBSCRIPTION => {
                match params.get("channel").and_then(Value::as_str) {
                    Some(channel) => {
                        let channel = channel.to_string();
                        let data = params.get("data").cloned().unwrap_or(Value::Null);
                        self.emit(WsMessage::Subscription { channel, data });
                    }
                    None => self.emit(WsMessage::Notification { method, params }),
                }
            }
            Inbound::Notification { method, params } => {
                self.emit(WsMessage::Notification { method, params });
            }
            Inbound::Response { id, result } => {
                let unclaimed = match id {
                    Some(id) => self.pending.resolve(id, result),
                    None => Some(result),
                };
                let Some(result) = unclaimed else {
                    return;
                };
                if let Some(id) = id {
                    if lock(&self.internal).remove(&id) {
                        if let Err(e) = result {
                            warn!(id, code = e.code, message = %e.message, "Internal request failed");
                        }
                        return;
                    }
                }
                self.emit(WsMessage::Response { id, result });
            }
        }
    }

    /// The read loop for `generation` ended without an explicit close
    async fn on_disconnect(self: &Arc<Self>, generation: u64, reason: String) {
        if self.is_closed() {
            return;
        }

        let connection = {
            let mut writer = self.writer.lock().await;
            match writer.as_ref() {
                Some(current) if current.generation == generation => writer.take(),
                _ => return,
            }
        };
        if let Some(mut connection) = connection {
            if let Err(e) = connection.sink.close().await {
                trace!("Error closing WebSocket sink: {}", e);
            }
        }

        let failed = self.pending.fail_all();
        lock(&self.internal).clear();

        if self.is_closed() {
            return;
        }
        let state = *self.state.borrow();
        if state != SessionState::Live {
            debug!(%state, reason = %reason, "Connection lost during establishment");
            return;
        }

        warn!(reason = %reason, failed, "WebSocket connection lost, reconnecting");
        self.set_state(SessionState::Reconnecting);
        tokio::spawn(reconnect(self.clone()));
    }

    /// Terminal failure: emit `SessionLost` and close
    async fn session_lost(&self, attempts: u32, reason: String) {
        error!(attempts, reason = %reason, "WebSocket session lost");
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Closed);
        self.drop_connection().await;
        self.emit(WsMessage::SessionLost { attempts, reason });
        self.shutdown.send_replace(true);
        self.pending.fail_all();
        lock(&self.out).take();
    }

    fn start_token_refresh(self: &Arc<Self>) {
        if !self.config.token_refresh || self.refresh_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(refresh_loop(self.clone()));
    }
}

async fn close_connection(mut connection: Connection) {
    connection.reader.abort();
    if let Err(e) = connection.sink.close().await {
        trace!("Error closing WebSocket sink: {}", e);
    }
}

#[async_trait]
impl RpcRequester for Inner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, DeribitError> {
        self.ensure_open()?;
        let id = self.ids.next();
        let reply = self.pending.register(id);

        trace!(id, method, "Sending request");
        if let Err(e) = self.write(id, method, &params).await {
            self.pending.remove(id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, reply).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(e.into_api_error(method)),
            Ok(Err(_)) => Err(DeribitError::ConnectionClosed(format!(
                "Connection lost before reply to {}",
                method
            ))),
            Err(_) => {
                self.pending.remove(id);
                Err(DeribitError::Timeout(format!(
                    "No reply to {} (id {}) within {:?}",
                    method, id, self.config.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl RpcNotifier for Inner {
    async fn notify(&self, method: &str, params: Value) -> Result<u64, DeribitError> {
        self.send_request(method, params, false).await
    }
}

/// Notifier for session-internal traffic; replies are not surfaced
struct Internal(Arc<Inner>);

#[async_trait]
impl RpcNotifier for Internal {
    async fn notify(&self, method: &str, params: Value) -> Result<u64, DeribitError> {
        self.0.send_request(method, params, true).await
    }
}

fn read_loop(inner: Arc<Inner>, mut source: WsSource, generation: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let mut shutdown = inner.shutdown.subscribe();
        let reason = loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = inner.write_frame(Message::Pong(data)).await {
                            trace!("Failed to answer ping: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break format!("Closed by server: {:?}", frame);
                    }
                    Some(Ok(frame)) => inner.handle_frame(frame).await,
                    Some(Err(e)) => break e.to_string(),
                    None => break "Stream ended".to_string(),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        };

        inner.on_disconnect(generation, reason).await;
    })
}

fn reconnect(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(url) = lock(&inner.url).clone() else {
            return;
        };
        let scope = inner.scope();
        let policy = inner.config.reconnect.clone();
        let mut delays = policy.delays();
        let mut shutdown = inner.shutdown.subscribe();
        let mut attempts = 0u32;

        loop {
            if inner.is_closed() {
                return;
            }
            attempts += 1;
            info!(attempt = attempts, max_attempts = policy.max_attempts, "Reconnecting WebSocket");

            let established = match inner.establish(&url, scope).await {
                Ok(generation) => inner.go_live(generation, Some(WsMessage::Reconnected)).await,
                Err(e) => Err(e),
            };
            let error = match established {
                Ok(()) => {
                    info!(attempts, "WebSocket session re-established");
                    return;
                }
                Err(e) => e,
            };

            inner.drop_connection().await;
            inner.pending.fail_all();
            if inner.is_closed() {
                return;
            }
            if !error.is_transport() {
                inner.session_lost(attempts, error.to_string()).await;
                return;
            }

            warn!(attempt = attempts, error = %error, "Reconnect attempt failed");
            inner.set_state(SessionState::Reconnecting);

            let Some(delay) = delays.next() else {
                inner
                    .session_lost(attempts, format!("Reconnect attempts exhausted: {}", error))
                    .await;
                return;
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    })
}

/// Refresh the access token at 80% of its lifetime until shutdown
async fn refresh_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let wait = inner
            .auth
            .expires_in()
            .map_or(Duration::from_secs(60), |secs| Duration::from_secs(secs * 4 / 5).max(Duration::from_secs(1)));

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
        if inner.is_closed() {
            break;
        }

        let refreshed = match inner.auth.refresh(&*inner).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Token refresh failed, re-authenticating: {}", e);
                inner.auth.authenticate(&*inner).await.map(|_| ())
            }
        };
        if let Err(e) = refreshed {
            warn!("Re-authentication failed: {}", e);
        }
    }
    debug!("Token refresh task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::deribit::auth::Credentials;

    struct Refusing;

    #[async_trait]
    impl WsConnector for Refusing {
        async fn connect(&self, _url: &str) -> Result<crate::core::kernel::WsHandle, DeribitError> {
            Err(DeribitError::NetworkError("connection refused".to_string()))
        }
    }

    fn client() -> DeribitWsClient {
        DeribitWsClient::new(
            Arc::new(Refusing),
            Arc::new(AuthSession::new(Credentials::new("", ""))),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval, 60);
        assert_eq!(config.scope, Scope::Public);
        assert_eq!(config.client_name, "deribit-rpc");
        assert_eq!(SessionConfig::private().scope, Scope::Private);
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        let client = client();
        let err = client.connect("test.deribit.com").await.unwrap_err();

        assert!(matches!(err, DeribitError::NetworkError(_)));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.connect("test.deribit.com").await.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_tracked() {
        let client = client();
        let err = client.subscribe(&["book.BTC-PERPETUAL.raw".to_string()]).await;

        assert!(matches!(err, Err(DeribitError::NotConnected)));
        assert_eq!(client.subscriptions().await, vec!["book.BTC-PERPETUAL.raw"]);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let client = client();
        client.close().await;

        assert_eq!(client.state(), SessionState::Closed);
        assert!(matches!(client.ping().await, Err(DeribitError::SessionClosed)));
        assert!(matches!(
            client.connect("test.deribit.com").await,
            Err(DeribitError::SessionClosed)
        ));
    }

    /// Accepts every frame and never answers
    struct Silent;

    #[async_trait]
    impl WsConnector for Silent {
        async fn connect(&self, _url: &str) -> Result<crate::core::kernel::WsHandle, DeribitError> {
            let sink = futures_util::sink::drain::<Message>()
                .sink_map_err(|e| -> DeribitError { match e {} });
            let source = futures_util::stream::pending::<Result<Message, DeribitError>>();
            Ok(crate::core::kernel::WsHandle::new(Box::pin(sink), Box::pin(source)))
        }
    }

    #[tokio::test]
    async fn test_close_during_connect_stays_closed() {
        let client = DeribitWsClient::new(
            Arc::new(Silent),
            Arc::new(AuthSession::new(Credentials::new("", ""))),
            SessionConfig::default(),
        );
        let mut states = client.state_changes();

        let connecting = {
            let client = client.clone();
            tokio::spawn(async move { client.connect("test.deribit.com").await })
        };
        states
            .wait_for(|state| *state == SessionState::Connecting)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        client.close().await;
        let result = connecting.await.unwrap();

        assert!(result.is_err());
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.is_closed());
    }
}
