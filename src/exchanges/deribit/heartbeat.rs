use crate::core::errors::DeribitError;
use crate::exchanges::deribit::rpc::{RpcNotifier, RpcRequester};
use crate::exchanges::deribit::types::{HeartbeatParams, HeartbeatType, METHOD_SET_HEARTBEAT, METHOD_TEST};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Server heartbeat negotiation and replies
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatResponder {
    interval_secs: u64,
}

impl HeartbeatResponder {
    pub const fn new(interval_secs: u64) -> Self {
        Self { interval_secs }
    }

    pub const fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Ask the server to send heartbeats. Called once per connection, after `public/hello`.
    pub async fn negotiate(&self, rpc: &dyn RpcRequester) -> Result<(), DeribitError> {
        debug!("Enabling heartbeat with interval: {} seconds", self.interval_secs);
        let params = serde_json::to_value(HeartbeatParams {
            interval: self.interval_secs,
        })?;
        rpc.request(METHOD_SET_HEARTBEAT, params).await?;
        Ok(())
    }

    /// Answer one `heartbeat` notification with a single `public/test`
    pub async fn on_heartbeat(
        &self,
        params: &Value,
        notifier: &dyn RpcNotifier,
    ) -> Result<u64, DeribitError> {
        let heartbeat_type = HeartbeatType::from_params(params);
        trace!(?heartbeat_type, "Responding to heartbeat");
        notifier.notify(METHOD_TEST, json!({})).await
    }

    /// Send `public/test` every `period` until `shutdown` flips to true
    ///
    /// Failed probes are logged and the loop keeps going; the session may be
    /// between connections.
    pub fn spawn_keepalive(
        notifier: Arc<dyn RpcNotifier>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = notifier.notify(METHOD_TEST, json!({})).await {
                            warn!("Keepalive probe failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Keepalive task stopped");
        })
    }
}
