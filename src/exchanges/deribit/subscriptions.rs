use crate::core::errors::DeribitError;
use crate::exchanges::deribit::rpc::RpcNotifier;
use crate::exchanges::deribit::types::{ChannelsParams, Scope};
use serde_json::{json, Value};
use tracing::debug;

/// Channels the session is subscribed to, in subscription order
///
/// Every mutation is paired with the matching outbound request. The registry
/// is updated before the send, so a failed send leaves the channel tracked and
/// the next replay subscribes it again.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    channels: Vec<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Track `channels` and send `{scope}/subscribe` for them. Duplicates are kept.
    pub async fn add(
        &mut self,
        channels: &[String],
        scope: Scope,
        notifier: &dyn RpcNotifier,
    ) -> Result<u64, DeribitError> {
        self.channels.extend(channels.iter().cloned());
        debug!(channel_count = channels.len(), total = self.channels.len(), "Subscribing");
        notifier
            .notify(&scope.method("subscribe"), channels_params(channels)?)
            .await
    }

    /// Drop every exact match of `channels` and send `{scope}/unsubscribe`
    pub async fn remove(
        &mut self,
        channels: &[String],
        scope: Scope,
        notifier: &dyn RpcNotifier,
    ) -> Result<u64, DeribitError> {
        self.channels.retain(|c| !channels.contains(c));
        debug!(channel_count = channels.len(), total = self.channels.len(), "Unsubscribing");
        notifier
            .notify(&scope.method("unsubscribe"), channels_params(channels)?)
            .await
    }

    /// Forget everything and send `{scope}/unsubscribe_all`
    pub async fn clear(
        &mut self,
        scope: Scope,
        notifier: &dyn RpcNotifier,
    ) -> Result<u64, DeribitError> {
        self.channels.clear();
        notifier
            .notify(&scope.method("unsubscribe_all"), json!({}))
            .await
    }

    /// Re-subscribe the whole tracked set in one request. Nothing is sent when empty.
    pub async fn replay(
        &self,
        scope: Scope,
        notifier: &dyn RpcNotifier,
    ) -> Result<Option<u64>, DeribitError> {
        if self.channels.is_empty() {
            return Ok(None);
        }

        debug!(channel_count = self.channels.len(), "Replaying subscriptions");
        let id = notifier
            .notify(&scope.method("subscribe"), channels_params(&self.channels)?)
            .await?;
        Ok(Some(id))
    }
}

fn channels_params(channels: &[String]) -> Result<Value, DeribitError> {
    Ok(serde_json::to_value(ChannelsParams {
        channels: channels.to_vec(),
    })?)
}
