//! Collaborator seams toward the chat-platform gateway.
//!
//! The core never talks to the platform directly: channel provisioning and
//! log mirroring go through these traits, and the gateway implements them
//! with whatever client library it uses. [`NoopProvisioner`] and
//! [`NoopMirror`] back headless runs and tests.

use async_trait::async_trait;

/// Opaque handle to a platform channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle(pub String);

impl std::fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message fetched from a channel, oldest-first when batched.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub author: String,
    pub content: String,
}

/// Channel lifecycle operations the platform performs on our behalf.
#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    /// Create a private channel under the given parent category, visible to
    /// the ticket owner and the support roles.
    async fn create_channel(
        &self,
        name: &str,
        parent_category: Option<&str>,
        owner_user_id: &str,
    ) -> Result<ChannelHandle, String>;

    /// Delete a channel.
    async fn delete_channel(&self, handle: &ChannelHandle) -> Result<(), String>;

    /// Fetch the most recent messages of a channel, returned in
    /// chronological order.
    async fn fetch_recent_messages(
        &self,
        handle: &ChannelHandle,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, String>;
}

/// Best-effort delivery of formatted audit lines to external log channels.
#[async_trait]
pub trait LogMirror: Send + Sync {
    /// Deliver one formatted event to the channel mapped to `category`,
    /// falling back to the general channel. Fire-and-forget: errors are the
    /// implementor's to swallow, and the sink ignores the result anyway.
    async fn deliver(&self, category: &str, formatted: &str);
}

/// Provisioner for headless runs: channel operations fail softly.
pub struct NoopProvisioner;

#[async_trait]
impl ChannelProvisioner for NoopProvisioner {
    async fn create_channel(
        &self,
        name: &str,
        _parent_category: Option<&str>,
        _owner_user_id: &str,
    ) -> Result<ChannelHandle, String> {
        Ok(ChannelHandle(format!("noop:{name}")))
    }

    async fn delete_channel(&self, _handle: &ChannelHandle) -> Result<(), String> {
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        _handle: &ChannelHandle,
        _limit: usize,
    ) -> Result<Vec<ChannelMessage>, String> {
        Ok(Vec::new())
    }
}

/// Mirror that drops every event.
pub struct NoopMirror;

#[async_trait]
impl LogMirror for NoopMirror {
    async fn deliver(&self, _category: &str, _formatted: &str) {}
}
