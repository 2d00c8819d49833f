//! Moderation state: warnings, mute records, black/whitelists, and the
//! automod toggles.
//!
//! Enforcement (actually muting, kicking, deleting messages) is the
//! platform's job; this is the durable record the platform consults and
//! the advisory screens feed.

pub mod automod;

use crate::audit::{LogCategory, LogPayload};
use crate::error::{OpError, OpResult};
use crate::ids;
use crate::ledger::UserId;
use crate::state::Warden;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Longest accepted mute, in minutes (28 days).
pub const MAX_MUTE_MINUTES: i64 = 40_320;

/// One warning issued to a user. Warning lists are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub id: String,
    pub reason: String,
    pub moderator_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of a platform-enforced mute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteRecord {
    pub until: DateTime<Utc>,
    pub reason: String,
    pub moderator_id: UserId,
}

/// Automod feature toggles. All screens default to on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomodFlags {
    pub antilink: bool,
    pub antiping: bool,
    pub antiraid: bool,
    pub antibot: bool,
}

impl Default for AutomodFlags {
    fn default() -> Self {
        Self {
            antilink: true,
            antiping: true,
            antiraid: true,
            antibot: true,
        }
    }
}

/// The process-wide moderation table.
///
/// Whitelist and blacklist are advisory, not mutually exclusive: the
/// whitelist is checked first and short-circuits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationState {
    pub warnings: HashMap<UserId, Vec<Warning>>,
    pub blacklist: HashSet<UserId>,
    pub whitelist: HashSet<UserId>,
    pub automod: AutomodFlags,
    pub muted_users: HashMap<UserId, MuteRecord>,
}

impl ModerationState {
    pub fn warning_count(&self) -> usize {
        self.warnings.values().map(Vec::len).sum()
    }
}

impl Warden {
    /// Append a warning to a user's record.
    pub async fn warn_user(&self, actor_id: &str, user_id: &str, reason: &str) -> OpResult<Warning> {
        let warning = Warning {
            id: ids::opaque(8),
            reason: reason.to_string(),
            moderator_id: actor_id.to_string(),
            timestamp: Utc::now(),
        };
        {
            let mut moderation = self.moderation.write();
            moderation
                .warnings
                .entry(user_id.to_string())
                .or_default()
                .push(warning.clone());
        }
        self.flush_moderation().await;
        self.audit.record(
            LogCategory::Moderator,
            LogPayload::fields(vec![
                ("action", "warn".to_string()),
                ("warning", warning.id.clone()),
                ("reason", reason.to_string()),
                ("by", actor_id.to_string()),
            ]),
            Some(user_id),
        );
        Ok(warning)
    }

    /// Record a mute the platform is enforcing. Duration must be between
    /// 1 minute and 28 days.
    pub async fn record_mute(
        &self,
        actor_id: &str,
        user_id: &str,
        minutes: i64,
        reason: &str,
    ) -> OpResult<MuteRecord> {
        if !(1..=MAX_MUTE_MINUTES).contains(&minutes) {
            return Err(OpError::Validation(format!(
                "mute duration must be between 1 and {MAX_MUTE_MINUTES} minutes"
            )));
        }
        let record = MuteRecord {
            until: Utc::now() + Duration::minutes(minutes),
            reason: reason.to_string(),
            moderator_id: actor_id.to_string(),
        };
        self.moderation
            .write()
            .muted_users
            .insert(user_id.to_string(), record.clone());
        self.flush_moderation().await;
        self.audit.record(
            LogCategory::Moderator,
            LogPayload::fields(vec![
                ("action", "mute".to_string()),
                ("minutes", minutes.to_string()),
                ("reason", reason.to_string()),
                ("by", actor_id.to_string()),
            ]),
            Some(user_id),
        );
        Ok(record)
    }

    /// Drop a user's mute record. Returns whether one existed.
    pub async fn record_unmute(&self, actor_id: &str, user_id: &str) -> bool {
        let removed = self.moderation.write().muted_users.remove(user_id).is_some();
        if removed {
            self.flush_moderation().await;
        }
        self.audit.record(
            LogCategory::Moderator,
            LogPayload::fields(vec![
                ("action", "unmute".to_string()),
                ("by", actor_id.to_string()),
            ]),
            Some(user_id),
        );
        removed
    }

    /// Add or remove a user from the blacklist.
    pub async fn set_blacklisted(&self, user_id: &str, blacklisted: bool) {
        let changed = {
            let mut moderation = self.moderation.write();
            if blacklisted {
                moderation.blacklist.insert(user_id.to_string())
            } else {
                moderation.blacklist.remove(user_id)
            }
        };
        if changed {
            self.flush_moderation().await;
        }
    }

    /// Add or remove a user from the whitelist.
    pub async fn set_whitelisted(&self, user_id: &str, whitelisted: bool) {
        let changed = {
            let mut moderation = self.moderation.write();
            if whitelisted {
                moderation.whitelist.insert(user_id.to_string())
            } else {
                moderation.whitelist.remove(user_id)
            }
        };
        if changed {
            self.flush_moderation().await;
        }
    }

    /// Replace the automod toggles.
    pub async fn set_automod_flags(&self, flags: AutomodFlags) {
        self.moderation.write().automod = flags;
        self.flush_moderation().await;
    }
}
