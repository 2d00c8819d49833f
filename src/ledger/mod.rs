//! Access ledger: per-user subscription records and monthly quota
//! accounting.
//!
//! Quota accounting is deliberately lazy. Counters roll over when the
//! wall-clock period no longer matches the stored period key, and only at
//! the moment of an access check or consumption, never on a schedule. An
//! account that sleeps through a period catches up on its next check, so
//! callers must not read `files_used_this_period` without going through
//! [`Ledger::can_consume`] or [`Ledger::record_consumption`] first.

use crate::audit::{LogCategory, LogPayload};
use crate::error::{OpError, OpResult};
use crate::state::Warden;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Platform user identifier.
pub type UserId = String;

/// Tier identifier: the lower-cased tier name.
pub type TierId = String;

/// Quota sentinel meaning "no monthly limit".
pub const UNLIMITED_QUOTA: i64 = -1;

/// A metered client account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAccount {
    /// Granted tier; `None` means no access.
    pub access_tier: Option<TierId>,
    /// Hard expiry; `None` means the grant does not expire.
    pub expiry: Option<DateTime<Utc>>,
    /// Files consumed in the current accounting period.
    pub files_used_this_period: u32,
    /// Accounting period this counter belongs to ("YYYY-MM"). Compared as
    /// a string, never parsed.
    pub period_key: String,
    pub joined_at: DateTime<Utc>,
}

impl ClientAccount {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            access_tier: None,
            expiry: None,
            files_used_this_period: 0,
            period_key: period_key(now),
            joined_at: now,
        }
    }

    /// Zero the counter iff the stored period no longer matches `now`.
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let current = period_key(now);
        if self.period_key != current {
            self.files_used_this_period = 0;
            self.period_key = current;
        }
    }
}

/// A named subscription level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTier {
    pub display_name: String,
    /// Monthly file allowance; [`UNLIMITED_QUOTA`] short-circuits every
    /// quota comparison.
    pub monthly_quota: i64,
    pub description: String,
}

/// Outcome of a usability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usability {
    Allowed,
    /// No account, or an account with no tier assigned.
    NoTier,
    Expired,
    QuotaExceeded,
}

impl Usability {
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Stable reason label; "none" when allowed.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allowed => "none",
            Self::NoTier => "no_tier",
            Self::Expired => "expired",
            Self::QuotaExceeded => "quota_exceeded",
        }
    }

    /// Human message for denial reasons.
    pub fn denial_message(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::NoTier => "no access configured",
            Self::Expired => "access expired",
            Self::QuotaExceeded => "monthly limit reached",
        }
    }
}

/// Snapshot view of one account, post-rollover.
#[derive(Debug, Clone)]
pub struct AccountStatus {
    pub user_id: UserId,
    pub tier: Option<AccessTier>,
    pub usability: Usability,
    pub files_used_this_period: u32,
    pub joined_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

/// The working copies of the client and tier tables.
///
/// Mutating checks run entirely under the map's shard guard with no
/// suspension point, so a check-then-consume pair from one dispatch turn
/// can never interleave with another writer mid-decision.
pub struct Ledger {
    pub clients: DashMap<UserId, ClientAccount>,
    pub tiers: DashMap<TierId, AccessTier>,
}

/// Format the accounting period of `now`.
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

impl Ledger {
    /// Build the ledger from loaded tables, seeding the default tiers on
    /// first run (an empty tier table).
    pub fn from_tables(
        clients: HashMap<UserId, ClientAccount>,
        tiers: HashMap<TierId, AccessTier>,
    ) -> Self {
        let ledger = Self {
            clients: clients.into_iter().collect(),
            tiers: tiers.into_iter().collect(),
        };
        if ledger.tiers.is_empty() {
            ledger.seed_default_tiers();
        }
        ledger
    }

    fn seed_default_tiers(&self) {
        for (id, name, quota, description) in [
            ("basic", "Basic", 10, "Basic access - 10 files per month"),
            ("premium", "Premium", 50, "Premium access - 50 files per month"),
            ("unlimited", "Unlimited", UNLIMITED_QUOTA, "Unlimited access"),
        ] {
            self.tiers.insert(
                id.to_string(),
                AccessTier {
                    display_name: name.to_string(),
                    monthly_quota: quota,
                    description: description.to_string(),
                },
            );
        }
        info!(count = 3, "Seeded default access tiers");
    }

    /// Can this user consume one metered unit right now?
    ///
    /// Performs the lazy period rollover as a side effect of the check:
    /// once the tier and expiry screens pass, a stale counter is zeroed
    /// even when the final answer is a quota denial.
    pub fn can_consume(&self, user_id: &str) -> Usability {
        self.can_consume_at(user_id, Utc::now())
    }

    pub(crate) fn can_consume_at(&self, user_id: &str, now: DateTime<Utc>) -> Usability {
        let Some(mut account) = self.clients.get_mut(user_id) else {
            return Usability::NoTier;
        };
        let Some(tier_id) = account.access_tier.clone() else {
            return Usability::NoTier;
        };

        if let Some(expiry) = account.expiry
            && now > expiry
        {
            return Usability::Expired;
        }

        account.roll_over(now);

        let Some(tier) = self.tiers.get(&tier_id) else {
            // Tier was granted and later vanished from the table; treat as
            // unassigned rather than unlimited.
            return Usability::NoTier;
        };
        if tier.monthly_quota != UNLIMITED_QUOTA
            && i64::from(account.files_used_this_period) >= tier.monthly_quota
        {
            return Usability::QuotaExceeded;
        }
        Usability::Allowed
    }

    /// Grant `tier_id` to a user, creating the account if needed and
    /// clearing any expiry. Fails on an unknown tier.
    pub fn grant(&self, user_id: &str, tier_id: &str) -> OpResult<TierId> {
        let tier_id = tier_id.to_lowercase();
        if !self.tiers.contains_key(&tier_id) {
            return Err(OpError::Validation(format!("unknown tier: {tier_id}")));
        }
        let mut account = self
            .clients
            .entry(user_id.to_string())
            .or_insert_with(|| ClientAccount::new(Utc::now()));
        account.access_tier = Some(tier_id.clone());
        account.expiry = None;
        Ok(tier_id)
    }

    /// Remove a user's account entirely. This is a hard delete: usage
    /// history and tier assignment are discarded.
    pub fn revoke(&self, user_id: &str) -> OpResult<ClientAccount> {
        self.clients
            .remove(user_id)
            .map(|(_, account)| account)
            .ok_or_else(|| OpError::NotFound(format!("no client account for {user_id}")))
    }

    /// Count one consumed unit.
    ///
    /// Caller contract: a `can_consume` in the same dispatch turn returned
    /// allowed; this is not re-validated here. Creates the account when
    /// missing so a contract violation cannot panic.
    pub fn record_consumption(&self, user_id: &str) -> u32 {
        self.record_consumption_at(user_id, Utc::now())
    }

    pub(crate) fn record_consumption_at(&self, user_id: &str, now: DateTime<Utc>) -> u32 {
        let mut account = self
            .clients
            .entry(user_id.to_string())
            .or_insert_with(|| ClientAccount::new(now));
        account.roll_over(now);
        account.files_used_this_period += 1;
        account.files_used_this_period
    }

    /// Define a new tier. The id is the lower-cased name; duplicates are
    /// rejected case-insensitively. `-1` means unlimited; other negative
    /// quotas are passed through unvalidated and behave as exhausted.
    pub fn add_tier(&self, name: &str, monthly_quota: i64) -> OpResult<TierId> {
        let tier_id = name.to_lowercase();
        if self.tiers.contains_key(&tier_id) {
            return Err(OpError::Validation(format!("tier already exists: {tier_id}")));
        }
        let description = if monthly_quota == UNLIMITED_QUOTA {
            format!("{name} access - unlimited")
        } else {
            format!("{name} access - {monthly_quota} files per month")
        };
        self.tiers.insert(
            tier_id.clone(),
            AccessTier {
                display_name: name.to_string(),
                monthly_quota,
                description,
            },
        );
        Ok(tier_id)
    }

    /// Status view for one account, rolling the period over first.
    pub fn status(&self, user_id: &str) -> Option<AccountStatus> {
        let usability = self.can_consume(user_id);
        let account = self.clients.get(user_id)?;
        let tier = account
            .access_tier
            .as_ref()
            .and_then(|id| self.tiers.get(id).map(|t| t.value().clone()));
        Some(AccountStatus {
            user_id: user_id.to_string(),
            tier,
            usability,
            files_used_this_period: account.files_used_this_period,
            joined_at: account.joined_at,
            expiry: account.expiry,
        })
    }
}

// Orchestrated operations: state transition, then durable flush, then
// audit entry, in that order. A failed flush is logged and does not roll
// back the in-memory change.
impl Warden {
    /// Grant a tier to a user.
    pub async fn grant_access(&self, actor_id: &str, user_id: &str, tier_id: &str) -> OpResult<TierId> {
        let granted = self.ledger.grant(user_id, tier_id)?;
        self.flush_clients().await;
        self.audit.record(
            LogCategory::Access,
            LogPayload::fields(vec![
                ("action", "grant".to_string()),
                ("tier", granted.clone()),
                ("by", actor_id.to_string()),
            ]),
            Some(user_id),
        );
        Ok(granted)
    }

    /// Remove a user's client account.
    pub async fn revoke_access(&self, actor_id: &str, user_id: &str) -> OpResult<ClientAccount> {
        let removed = self.ledger.revoke(user_id)?;
        self.flush_clients().await;
        self.audit.record(
            LogCategory::Access,
            LogPayload::fields(vec![
                ("action", "revoke".to_string()),
                (
                    "previous_tier",
                    removed.access_tier.clone().unwrap_or_else(|| "none".to_string()),
                ),
                ("by", actor_id.to_string()),
            ]),
            Some(user_id),
        );
        Ok(removed)
    }

    /// Count a consumed unit and flush.
    pub async fn consume_unit(&self, user_id: &str, label: &str) -> u32 {
        let used = self.ledger.record_consumption(user_id);
        self.stats.record_file();
        self.flush_clients().await;
        self.audit.record(
            LogCategory::Consumption,
            format!("file protected: {label}"),
            Some(user_id),
        );
        used
    }

    /// Define a new access tier.
    pub async fn define_tier(&self, actor_id: &str, name: &str, quota: i64) -> OpResult<TierId> {
        let tier_id = self.ledger.add_tier(name, quota)?;
        self.flush_tiers().await;
        self.audit.record(
            LogCategory::Admin,
            LogPayload::fields(vec![
                ("action", "tier_added".to_string()),
                ("tier", tier_id.clone()),
                ("quota", quota.to_string()),
            ]),
            Some(actor_id),
        );
        Ok(tier_id)
    }
}
