//! Audit/log sink.
//!
//! An append-only in-memory ring buffer of structured events, consumed by
//! the other components and optionally mirrored to external log channels.
//! Entries live for the process lifetime only; they are never persisted.

use crate::gateway::LogMirror;
use crate::ids;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum entries retained; oldest evicted first.
const BUFFER_CAPACITY: usize = 1000;

/// Event categories, each mapped to its own mirror channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Tickets,
    Messages,
    Voice,
    Pings,
    Roles,
    Raids,
    Moderator,
    Antilink,
    Access,
    Automod,
    Security,
    Admin,
    /// Metered file consumption; the per-user history view filters on this.
    Consumption,
    Error,
    Info,
}

impl LogCategory {
    /// Stable lowercase name, used for mirror channel keying.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::Messages => "messages",
            Self::Voice => "voice",
            Self::Pings => "pings",
            Self::Roles => "roles",
            Self::Raids => "raids",
            Self::Moderator => "moderator",
            Self::Antilink => "antilink",
            Self::Access => "access",
            Self::Automod => "automod",
            Self::Security => "security",
            Self::Admin => "admin",
            Self::Consumption => "consumption",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Event payload. A tagged variant, so consumers never sniff the shape.
#[derive(Debug, Clone)]
pub enum LogPayload {
    PlainText(String),
    Structured(Vec<(String, String)>),
}

impl LogPayload {
    /// Convenience constructor for structured payloads.
    pub fn fields<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        Self::Structured(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Render to a single line.
    pub fn render(&self) -> String {
        match self {
            Self::PlainText(s) => s.clone(),
            Self::Structured(fields) => fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<String> for LogPayload {
    fn from(s: String) -> Self {
        Self::PlainText(s)
    }
}

impl From<&str> for LogPayload {
    fn from(s: &str) -> Self {
        Self::PlainText(s.to_string())
    }
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub payload: LogPayload,
    pub user_id: Option<String>,
}

impl LogEntry {
    /// The formatted line forwarded to mirrors.
    pub fn formatted(&self) -> String {
        let mut line = format!(
            "[{}] {}",
            self.category.as_str().to_uppercase(),
            self.payload.render()
        );
        if let Some(user) = &self.user_id {
            line.push_str(&format!(" (user: {user})"));
        }
        line
    }
}

/// The sink: bounded ring buffer plus a best-effort external mirror.
pub struct AuditSink {
    entries: Mutex<VecDeque<LogEntry>>,
    mirror: Arc<dyn LogMirror>,
}

impl AuditSink {
    pub fn new(mirror: Arc<dyn LogMirror>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)),
            mirror,
        }
    }

    /// Record one event: assign an opaque id and the current timestamp,
    /// prepend to the buffer, truncate to capacity, and forward a formatted
    /// line to the mirror. Mirroring is fire-and-forget; a failing mirror
    /// must never fail the operation being audited.
    pub fn record<P: Into<LogPayload>>(
        &self,
        category: LogCategory,
        payload: P,
        user_id: Option<&str>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: ids::opaque(8),
            timestamp: Utc::now(),
            category,
            payload: payload.into(),
            user_id: user_id.map(|s| s.to_string()),
        };

        {
            let mut entries = self.entries.lock();
            entries.push_front(entry.clone());
            entries.truncate(BUFFER_CAPACITY);
        }

        let mirror = Arc::clone(&self.mirror);
        let line = entry.formatted();
        let category = category.as_str();
        tokio::spawn(async move {
            mirror.deliver(category, &line).await;
        });

        entry
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The most recent `limit` entries, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    /// The most recent entries recorded for `user_id` under `category`,
    /// newest first.
    pub fn history_for(&self, user_id: &str, category: LogCategory, limit: usize) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.category == category && e.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }
}
