//! Command dispatch boundary.
//!
//! The gateway resolves an inbound interaction to a [`CommandRequest`]:
//! the command with its parsed arguments, the acting user, the capability
//! flags the platform computed from role membership, and an opaque
//! delivery id. Dispatch screens the request (duplicate suppression,
//! maintenance mode, cooldown, capability gate), runs the operation, and
//! returns a discriminated payload for the gateway to render. Nothing
//! escapes this boundary: unclassified failures collapse to a generic
//! error and the process keeps serving.

mod dedup;

pub use dedup::DedupCache;

use crate::error::{OpError, OpResult};
use crate::ledger::{AccessTier, UserId};
use crate::moderation::automod::{JoinVerdict, MessageEvent, MessageVerdict};
use crate::protect::{self, Preset};
use crate::state::{StatsSnapshot, Warden};
use crate::tickets::{Ticket, TicketCategory};
use crate::audit::LogCategory;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::clock::{Clock, QuantaClock};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};


/// Capability flags computed externally from role membership. The core
/// never derives these from roles itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_support: bool,
    pub is_moderator: bool,
}

impl Capabilities {
    pub fn admin(&self) -> bool {
        self.is_admin || self.is_owner
    }

    pub fn support(&self) -> bool {
        self.is_support || self.admin()
    }

    pub fn moderator(&self) -> bool {
        self.is_moderator || self.admin()
    }
}

/// One parsed command.
#[derive(Debug, Clone)]
pub enum Command {
    Grant { user_id: UserId, tier_id: String },
    Revoke { user_id: UserId },
    AddTier { name: String, quota: i64 },
    ListTiers,
    ListClients,
    Check,
    History,
    Stats,
    Protect {
        file_name: String,
        content: Vec<u8>,
        preset: Option<Preset>,
    },
    CreateTicket { category: TicketCategory },
    CloseTicket { ticket_id: String },
    Warn { user_id: UserId, reason: String },
    Mute {
        user_id: UserId,
        minutes: i64,
        reason: String,
    },
    Unmute { user_id: UserId },
    /// `None` queries the current state.
    Maintenance { enable: Option<bool> },
}

impl Command {
    /// Stable name: cooldown key and log label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grant { .. } => "grant",
            Self::Revoke { .. } => "revoke",
            Self::AddTier { .. } => "add_tier",
            Self::ListTiers => "list_tiers",
            Self::ListClients => "list_clients",
            Self::Check => "check",
            Self::History => "history",
            Self::Stats => "stats",
            Self::Protect { .. } => "protect",
            Self::CreateTicket { .. } => "create_ticket",
            Self::CloseTicket { .. } => "close_ticket",
            Self::Warn { .. } => "warn",
            Self::Mute { .. } => "mute",
            Self::Unmute { .. } => "unmute",
            Self::Maintenance { .. } => "maintenance",
        }
    }
}

/// One inbound request.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: Command,
    pub actor_id: UserId,
    pub capabilities: Capabilities,
    /// Opaque platform delivery id, when the transport has one.
    pub delivery_id: Option<String>,
}

/// Tier definition view.
#[derive(Debug, Clone)]
pub struct TierView {
    pub id: String,
    pub display_name: String,
    pub monthly_quota: i64,
    pub description: String,
}

impl TierView {
    fn from_tier(id: &str, tier: &AccessTier) -> Self {
        Self {
            id: id.to_string(),
            display_name: tier.display_name.clone(),
            monthly_quota: tier.monthly_quota,
            description: tier.description.clone(),
        }
    }
}

/// Client listing row.
#[derive(Debug, Clone)]
pub struct ClientView {
    pub user_id: UserId,
    pub tier_id: Option<String>,
    pub files_used_this_period: u32,
    pub monthly_quota: Option<i64>,
}

/// Per-user usage history line.
#[derive(Debug, Clone)]
pub struct HistoryLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Access status view for the `check` command.
#[derive(Debug, Clone)]
pub struct AccessStatusView {
    pub tier_name: Option<String>,
    pub allowed: bool,
    pub denial_reason: Option<&'static str>,
    pub files_used_this_period: u32,
    pub monthly_quota: Option<i64>,
    pub joined_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

/// Result payload of a dispatched command, ready for rendering.
#[derive(Debug, Clone)]
pub enum Payload {
    Granted { user_id: UserId, tier_id: String },
    Revoked {
        user_id: UserId,
        previous_tier: Option<String>,
    },
    TierAdded { tier_id: String, quota: i64 },
    Tiers(Vec<TierView>),
    Clients(Vec<ClientView>),
    AccessStatus(AccessStatusView),
    History(Vec<HistoryLine>),
    Stats(StatsSnapshot),
    Protected {
        file_name: String,
        preset: String,
        output: Vec<u8>,
        files_used_this_period: u32,
    },
    TicketCreated(Ticket),
    TicketClosed { ticket_id: String },
    Warned { warning_id: String },
    MuteRecorded { until: DateTime<Utc> },
    UnmuteRecorded { was_muted: bool },
    MaintenanceStatus { enabled: bool },
    /// The delivery id was already processed inside the window.
    DuplicateDelivery,
}

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Per-user-per-command cooldown limiters, pruned by the maintenance loop.
pub struct CooldownManager {
    period: Duration,
    limiters: DashMap<(UserId, &'static str), DirectRateLimiter>,
    clock: QuantaClock,
}

impl CooldownManager {
    /// A zero period disables the cooldown entirely.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            limiters: DashMap::new(),
            clock: QuantaClock::default(),
        }
    }

    /// Consume one token; on denial, the seconds left on the cooldown.
    pub fn check(&self, user_id: &str, command: &'static str) -> Result<(), u64> {
        let Some(quota) = Quota::with_period(self.period) else {
            return Ok(());
        };
        let limiter = self
            .limiters
            .entry((user_id.to_string(), command))
            .or_insert_with(|| RateLimiter::direct(quota.allow_burst(nonzero!(1u32))));
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }

    /// Bound memory growth; entries are cheap but unbounded keys are not.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;
        if self.limiters.len() > MAX_ENTRIES {
            self.limiters.clear();
            warn!("cleared command cooldown limiters (exceeded {} entries)", MAX_ENTRIES);
        }
    }
}

/// The command boundary.
pub struct Dispatcher {
    warden: Arc<Warden>,
    cooldowns: CooldownManager,
    dedup: DedupCache,
}

impl Dispatcher {
    pub fn new(warden: Arc<Warden>) -> Self {
        let cooldown = Duration::from_secs(warden.config.server.command_cooldown_secs);
        Self {
            warden,
            cooldowns: CooldownManager::new(cooldown),
            dedup: DedupCache::default(),
        }
    }

    pub fn warden(&self) -> &Arc<Warden> {
        &self.warden
    }

    /// Run periodic upkeep: expire dedup entries, bound cooldown memory.
    pub fn sweep(&self) {
        self.dedup.sweep();
        self.cooldowns.cleanup();
    }

    /// Process one request end to end.
    pub async fn dispatch(&self, request: CommandRequest) -> OpResult<Payload> {
        if let Some(delivery_id) = &request.delivery_id
            && self.dedup.check(delivery_id)
        {
            return Ok(Payload::DuplicateDelivery);
        }

        if self.warden.maintenance_enabled() && !request.capabilities.is_owner {
            return Err(OpError::Permission);
        }

        if let Err(seconds) = self.cooldowns.check(&request.actor_id, request.command.name()) {
            return Err(OpError::Cooldown { seconds });
        }

        let command_name = request.command.name();
        let actor = request.actor_id.clone();
        match self.route(request).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                match &e {
                    OpError::External(_) | OpError::Timeout | OpError::Internal(_) => {
                        error!(command = %command_name, actor = %actor, code = e.error_code(), error = %e, "Command failed");
                        self.warden.audit.record(
                            LogCategory::Error,
                            format!("{command_name} failed: {e}"),
                            Some(&actor),
                        );
                    }
                    // A denied moderation action is a security event; other
                    // permission failures are not logged.
                    OpError::Permission
                        if matches!(command_name, "warn" | "mute" | "unmute") =>
                    {
                        self.warden.audit.record(
                            LogCategory::Security,
                            format!("{command_name} denied"),
                            Some(&actor),
                        );
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    async fn route(&self, request: CommandRequest) -> OpResult<Payload> {
        let caps = request.capabilities;
        let actor = request.actor_id.as_str();
        let warden = &self.warden;

        match request.command {
            Command::Grant { user_id, tier_id } => {
                require(caps.admin())?;
                let tier_id = warden.grant_access(actor, &user_id, &tier_id).await?;
                Ok(Payload::Granted { user_id, tier_id })
            }
            Command::Revoke { user_id } => {
                require(caps.admin())?;
                let removed = warden.revoke_access(actor, &user_id).await?;
                Ok(Payload::Revoked {
                    user_id,
                    previous_tier: removed.access_tier,
                })
            }
            Command::AddTier { name, quota } => {
                require(caps.admin())?;
                let tier_id = warden.define_tier(actor, &name, quota).await?;
                Ok(Payload::TierAdded { tier_id, quota })
            }
            Command::ListTiers => {
                require(caps.admin())?;
                let mut tiers: Vec<TierView> = warden
                    .ledger
                    .tiers
                    .iter()
                    .map(|entry| TierView::from_tier(entry.key(), entry.value()))
                    .collect();
                tiers.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(Payload::Tiers(tiers))
            }
            Command::ListClients => {
                require(caps.admin())?;
                let mut clients: Vec<ClientView> = warden
                    .ledger
                    .clients
                    .iter()
                    .map(|entry| {
                        let quota = entry
                            .access_tier
                            .as_ref()
                            .and_then(|id| warden.ledger.tiers.get(id).map(|t| t.monthly_quota));
                        ClientView {
                            user_id: entry.key().clone(),
                            tier_id: entry.access_tier.clone(),
                            files_used_this_period: entry.files_used_this_period,
                            monthly_quota: quota,
                        }
                    })
                    .collect();
                clients.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                Ok(Payload::Clients(clients))
            }
            Command::Check => {
                let status = warden
                    .ledger
                    .status(actor)
                    .ok_or_else(|| OpError::NotFound("you are not registered as a client".into()))?;
                Ok(Payload::AccessStatus(AccessStatusView {
                    tier_name: status.tier.as_ref().map(|t| t.display_name.clone()),
                    allowed: status.usability.allowed(),
                    denial_reason: (!status.usability.allowed()).then(|| status.usability.reason()),
                    files_used_this_period: status.files_used_this_period,
                    monthly_quota: status.tier.as_ref().map(|t| t.monthly_quota),
                    joined_at: status.joined_at,
                    expiry: status.expiry,
                }))
            }
            Command::History => {
                let lines = warden
                    .audit
                    .history_for(actor, LogCategory::Consumption, 10)
                    .into_iter()
                    .map(|entry| HistoryLine {
                        timestamp: entry.timestamp,
                        message: entry.payload.render(),
                    })
                    .collect();
                Ok(Payload::History(lines))
            }
            Command::Stats => {
                require(caps.admin())?;
                Ok(Payload::Stats(warden.stats_snapshot()))
            }
            Command::Protect {
                file_name,
                content,
                preset,
            } => {
                protect::validate_file(&file_name, content.len() as u64, &warden.config.protect)?;

                // The usability decision gates the transform; the counter
                // moves only after a successful transform, never on the
                // failure paths.
                let usability = warden.ledger.can_consume(actor);
                if !usability.allowed() {
                    return Err(OpError::Validation(usability.denial_message().to_string()));
                }

                let preset = preset.unwrap_or_default();
                let outcome =
                    protect::protect_file(&warden.config.protect, &file_name, &content, preset)
                        .await?;
                let used = warden.consume_unit(actor, &file_name).await;
                Ok(Payload::Protected {
                    file_name,
                    preset: outcome.preset_label.to_string(),
                    output: outcome.output,
                    files_used_this_period: used,
                })
            }
            Command::CreateTicket { category } => {
                let ticket = warden.create_ticket(actor, category).await?;
                Ok(Payload::TicketCreated(ticket))
            }
            Command::CloseTicket { ticket_id } => {
                require(caps.support())?;
                let ticket = warden.close_ticket(&ticket_id, actor).await?;
                Ok(Payload::TicketClosed { ticket_id: ticket.id })
            }
            Command::Warn { user_id, reason } => {
                require(caps.moderator())?;
                let warning = warden.warn_user(actor, &user_id, &reason).await?;
                Ok(Payload::Warned { warning_id: warning.id })
            }
            Command::Mute {
                user_id,
                minutes,
                reason,
            } => {
                require(caps.moderator())?;
                let record = warden.record_mute(actor, &user_id, minutes, &reason).await?;
                Ok(Payload::MuteRecorded { until: record.until })
            }
            Command::Unmute { user_id } => {
                require(caps.admin())?;
                let was_muted = warden.record_unmute(actor, &user_id).await;
                Ok(Payload::UnmuteRecorded { was_muted })
            }
            Command::Maintenance { enable } => {
                require(caps.is_owner)?;
                if let Some(enabled) = enable {
                    warden.set_maintenance(enabled);
                    warden.audit.record(
                        LogCategory::Admin,
                        format!(
                            "maintenance mode {}",
                            if enabled { "enabled" } else { "disabled" }
                        ),
                        Some(actor),
                    );
                }
                Ok(Payload::MaintenanceStatus {
                    enabled: warden.maintenance_enabled(),
                })
            }
        }
    }

    /// Screen an inbound message; advisory verdict for the gateway.
    pub fn screen_message(&self, event: MessageEvent<'_>) -> Option<MessageVerdict> {
        self.warden.screen_message(event)
    }

    /// Screen a member join; advisory verdict for the gateway.
    pub fn screen_join(
        &self,
        guild_id: &str,
        user_id: &str,
        is_bot: bool,
        joined_secs_ago: i64,
        extra_role_count: usize,
    ) -> JoinVerdict {
        self.warden.screen_join(
            guild_id,
            user_id,
            is_bot,
            joined_secs_ago,
            extra_role_count,
            Utc::now().timestamp(),
        )
    }
}

fn require(allowed: bool) -> OpResult<()> {
    if allowed { Ok(()) } else { Err(OpError::Permission) }
}
