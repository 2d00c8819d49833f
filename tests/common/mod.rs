//! Integration test common infrastructure.
//!
//! Builds a full application state on a temp directory with recording
//! collaborators, and provides request builders for the dispatch
//! boundary.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use wardend::config::Config;
use wardend::dispatch::{Capabilities, Command, CommandRequest, Dispatcher};
use wardend::gateway::{ChannelHandle, ChannelMessage, ChannelProvisioner, LogMirror};
use wardend::state::{Warden, WardenParams};
use wardend::store::Store;

/// Provisioner that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingProvisioner {
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub canned_messages: Mutex<Vec<ChannelMessage>>,
    pub fail_create: AtomicBool,
    pub fail_fetch: AtomicBool,
}

#[async_trait]
impl ChannelProvisioner for RecordingProvisioner {
    async fn create_channel(
        &self,
        name: &str,
        _parent_category: Option<&str>,
        _owner_user_id: &str,
    ) -> Result<ChannelHandle, String> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err("provisioner down".to_string());
        }
        self.created.lock().push(name.to_string());
        Ok(ChannelHandle(format!("chan-{name}")))
    }

    async fn delete_channel(&self, handle: &ChannelHandle) -> Result<(), String> {
        self.deleted.lock().push(handle.0.clone());
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        _handle: &ChannelHandle,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, String> {
        if self.fail_fetch.load(Ordering::Relaxed) {
            return Err("history unavailable".to_string());
        }
        let messages = self.canned_messages.lock().clone();
        Ok(messages.into_iter().take(limit).collect())
    }
}

/// Mirror that records delivered lines.
#[derive(Default)]
pub struct RecordingMirror {
    pub lines: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl LogMirror for RecordingMirror {
    async fn deliver(&self, category: &str, formatted: &str) {
        self.lines.lock().push((category.to_string(), formatted.to_string()));
    }
}

/// Everything a scenario needs.
pub struct TestHarness {
    pub dir: TempDir,
    pub warden: Arc<Warden>,
    pub dispatcher: Dispatcher,
    pub provisioner: Arc<RecordingProvisioner>,
    pub mirror: Arc<RecordingMirror>,
}

#[allow(dead_code)]
impl TestHarness {
    /// Fresh state on an empty temp directory.
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        Self::build(dir, |_| {}).await
    }

    /// Fresh state with a tweaked configuration.
    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        Self::build(dir, customize).await
    }

    /// Build on an existing directory (restart scenarios).
    pub async fn on_dir(dir: TempDir) -> Self {
        Self::build(dir, |_| {}).await
    }

    async fn build(dir: TempDir, customize: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        // No grace delay and no cooldown in tests unless a scenario
        // opts back in.
        config.tickets.close_grace_secs = 0;
        config.server.command_cooldown_secs = 0;
        customize(&mut config);

        let store = Store::new(dir.path());
        store.init().await.expect("store init");
        let tables = store.load().await;

        let provisioner = Arc::new(RecordingProvisioner::default());
        let mirror = Arc::new(RecordingMirror::default());
        let warden = Arc::new(Warden::new(WardenParams {
            config,
            store,
            tables,
            provisioner: provisioner.clone(),
            mirror: mirror.clone(),
        }));
        let dispatcher = Dispatcher::new(Arc::clone(&warden));
        Self {
            dir,
            warden,
            dispatcher,
            provisioner,
            mirror,
        }
    }

    pub fn store(&self) -> &Store {
        &self.warden.store
    }
}

#[allow(dead_code)]
pub fn owner_request(actor: &str, command: Command) -> CommandRequest {
    request(actor, command, Capabilities { is_owner: true, ..Default::default() })
}

#[allow(dead_code)]
pub fn admin_request(actor: &str, command: Command) -> CommandRequest {
    request(actor, command, Capabilities { is_admin: true, ..Default::default() })
}

#[allow(dead_code)]
pub fn support_request(actor: &str, command: Command) -> CommandRequest {
    request(actor, command, Capabilities { is_support: true, ..Default::default() })
}

#[allow(dead_code)]
pub fn moderator_request(actor: &str, command: Command) -> CommandRequest {
    request(actor, command, Capabilities { is_moderator: true, ..Default::default() })
}

#[allow(dead_code)]
pub fn member_request(actor: &str, command: Command) -> CommandRequest {
    request(actor, command, Capabilities::default())
}

fn request(actor: &str, command: Command, capabilities: Capabilities) -> CommandRequest {
    CommandRequest {
        command,
        actor_id: actor.to_string(),
        capabilities,
        delivery_id: None,
    }
}
