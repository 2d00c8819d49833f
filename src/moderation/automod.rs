//! Automated moderation screens.
//!
//! The predicates are stateless per-event checks; the raid watch is the
//! one windowed screen. All of them are advisory: the verdicts tell the
//! gateway what to do, and every triggered action lands in the audit sink.

use crate::audit::{LogCategory, LogPayload};
use crate::state::Warden;
use dashmap::DashMap;
use regex::Regex;
use std::sync::LazyLock;

/// Seconds a join stays inside the raid window.
const RAID_WINDOW_SECS: i64 = 30;

/// Joins within the window that trip the raid alert.
const RAID_THRESHOLD: usize = 5;

/// Mentions beyond this count are an excessive ping.
const PING_LIMIT: usize = 5;

/// Minutes of automatic mute for an excessive ping.
const PING_MUTE_MINUTES: i64 = 5;

/// A bot joining within this window with no roles is suspicious.
const YOUNG_BOT_SECS: i64 = 300;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://\S+|www\.\S+|discord\.gg/\S+)").expect("link pattern")
});

/// Does the text carry a link?
pub fn contains_link(text: &str) -> bool {
    LINK_RE.is_match(text)
}

/// More than [`PING_LIMIT`] mentions, or a broadcast ping.
pub fn excessive_pings(user_mentions: usize, role_mentions: usize, content: &str) -> bool {
    user_mentions + role_mentions > PING_LIMIT
        || content.contains("@everyone")
        || content.contains("@here")
}

/// A bot account that joined moments ago and holds no role beyond the
/// default one.
pub fn suspicious_bot(is_bot: bool, joined_secs_ago: i64, extra_role_count: usize) -> bool {
    is_bot && joined_secs_ago < YOUNG_BOT_SECS && extra_role_count == 0
}

/// Why a message was screened out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenReason {
    Blacklisted,
    Link,
    ExcessivePings,
}

impl ScreenReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::Link => "link",
            Self::ExcessivePings => "excessive_pings",
        }
    }

    fn category(&self) -> LogCategory {
        match self {
            Self::Blacklisted => LogCategory::Automod,
            Self::Link => LogCategory::Antilink,
            Self::ExcessivePings => LogCategory::Pings,
        }
    }
}

/// Advisory verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVerdict {
    Delete(ScreenReason),
    DeleteAndMute { minutes: i64, reason: ScreenReason },
}

/// Advisory verdict for one member join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinVerdict {
    /// Kick the joining account (suspicious bot).
    pub kick_bot: bool,
    /// Raid alert: how many joins landed inside the window.
    pub raid_alert: Option<usize>,
}

/// One inbound message, reduced to what the screens need.
#[derive(Debug, Clone, Copy)]
pub struct MessageEvent<'a> {
    pub author_id: &'a str,
    pub author_is_bot: bool,
    /// Moderators and admins bypass every screen.
    pub author_is_privileged: bool,
    pub user_mentions: usize,
    pub role_mentions: usize,
    pub content: &'a str,
}

/// Sliding window of recent joins per guild.
#[derive(Default)]
pub struct RaidWatch {
    joins: DashMap<String, Vec<i64>>,
}

impl RaidWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join at `now` (unix seconds) and return how many joins the
    /// guild saw inside the window, including this one.
    pub fn record_join(&self, guild_id: &str, now: i64) -> usize {
        let mut joins = self.joins.entry(guild_id.to_string()).or_default();
        joins.retain(|t| now - *t < RAID_WINDOW_SECS);
        joins.push(now);
        joins.len()
    }
}

impl Warden {
    /// Screen one message against the lists and the automod toggles.
    ///
    /// Order matters: bots and privileged authors bypass everything, the
    /// whitelist short-circuits next, then blacklist, antilink, antiping.
    /// A triggered verdict is recorded to the audit sink.
    pub fn screen_message(&self, event: MessageEvent<'_>) -> Option<MessageVerdict> {
        if event.author_is_bot || event.author_is_privileged {
            return None;
        }

        let verdict = {
            let moderation = self.moderation.read();
            if moderation.whitelist.contains(event.author_id) {
                return None;
            }
            if moderation.blacklist.contains(event.author_id) {
                Some(MessageVerdict::Delete(ScreenReason::Blacklisted))
            } else if moderation.automod.antilink && contains_link(event.content) {
                Some(MessageVerdict::Delete(ScreenReason::Link))
            } else if moderation.automod.antiping
                && excessive_pings(event.user_mentions, event.role_mentions, event.content)
            {
                Some(MessageVerdict::DeleteAndMute {
                    minutes: PING_MUTE_MINUTES,
                    reason: ScreenReason::ExcessivePings,
                })
            } else {
                None
            }
        };

        if let Some(verdict) = verdict {
            let (action, reason) = match verdict {
                MessageVerdict::Delete(r) => ("delete", r),
                MessageVerdict::DeleteAndMute { reason, .. } => ("delete_and_mute", reason),
            };
            self.audit.record(
                reason.category(),
                LogPayload::fields(vec![
                    ("action", action.to_string()),
                    ("reason", reason.as_str().to_string()),
                ]),
                Some(event.author_id),
            );
        }
        verdict
    }

    /// Screen one member join: suspicious-bot kick and raid-window alert.
    pub fn screen_join(
        &self,
        guild_id: &str,
        user_id: &str,
        is_bot: bool,
        joined_secs_ago: i64,
        extra_role_count: usize,
        now: i64,
    ) -> JoinVerdict {
        let flags = self.moderation.read().automod;
        let mut verdict = JoinVerdict::default();

        if flags.antibot && suspicious_bot(is_bot, joined_secs_ago, extra_role_count) {
            verdict.kick_bot = true;
            self.audit.record(
                LogCategory::Raids,
                LogPayload::fields(vec![("action", "kick_suspicious_bot".to_string())]),
                Some(user_id),
            );
            return verdict;
        }

        if flags.antiraid {
            let recent = self.raid_watch.record_join(guild_id, now);
            if recent > RAID_THRESHOLD {
                verdict.raid_alert = Some(recent);
                self.audit.record(
                    LogCategory::Security,
                    LogPayload::fields(vec![
                        ("action", "raid_alert".to_string()),
                        ("guild", guild_id.to_string()),
                        ("recent_joins", recent.to_string()),
                    ]),
                    Some(user_id),
                );
            }
        }
        verdict
    }
}
