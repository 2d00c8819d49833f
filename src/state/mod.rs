//! Central shared state.
//!
//! The [`Warden`] holds the working copies of every durable table plus the
//! process-lifetime pieces (audit sink, counters, raid watch) in one
//! explicitly-owned struct. Operations take it by reference; nothing in
//! the crate reaches for ambient globals.

use crate::audit::AuditSink;
use crate::config::Config;
use crate::gateway::{ChannelProvisioner, LogMirror};
use crate::ledger::Ledger;
use crate::moderation::ModerationState;
use crate::moderation::automod::RaidWatch;
use crate::store::{self, LoadedTables, Store, Table};
use crate::tickets::Tickets;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Process-lifetime counters.
pub struct Stats {
    total_files: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Stats {
    fn new() -> Self {
        Self {
            total_files: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_file(&self) {
        self.total_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_files(&self) -> u64 {
        self.total_files.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Point-in-time view over the state, for the stats operation.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub client_count: usize,
    pub files_this_period: u64,
    pub total_files: u64,
    pub total_tickets: usize,
    pub open_tickets: usize,
    pub warning_count: usize,
    pub muted_count: usize,
    pub uptime_secs: i64,
}

/// Parameters for building a [`Warden`].
pub struct WardenParams {
    pub config: Config,
    pub store: Store,
    pub tables: LoadedTables,
    pub provisioner: Arc<dyn ChannelProvisioner>,
    pub mirror: Arc<dyn LogMirror>,
}

/// The application state.
pub struct Warden {
    pub config: Config,
    pub store: Store,
    pub ledger: Ledger,
    pub tickets: Tickets,
    pub moderation: RwLock<ModerationState>,
    pub audit: AuditSink,
    pub stats: Stats,
    pub raid_watch: RaidWatch,
    maintenance: AtomicBool,
    pub provisioner: Arc<dyn ChannelProvisioner>,
}

impl Warden {
    pub fn new(params: WardenParams) -> Self {
        let WardenParams {
            config,
            store,
            tables,
            provisioner,
            mirror,
        } = params;
        Self {
            config,
            store,
            ledger: Ledger::from_tables(tables.clients, tables.tiers),
            tickets: Tickets::from_table(tables.tickets),
            moderation: RwLock::new(tables.moderation),
            audit: AuditSink::new(mirror),
            stats: Stats::new(),
            raid_watch: RaidWatch::new(),
            maintenance: AtomicBool::new(false),
            provisioner,
        }
    }

    /// Owner-only service gate. While enabled, non-owner commands bounce.
    pub fn maintenance_enabled(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Relaxed);
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let files_this_period: u64 = self
            .ledger
            .clients
            .iter()
            .map(|c| u64::from(c.files_used_this_period))
            .sum();
        let moderation = self.moderation.read();
        StatsSnapshot {
            client_count: self.ledger.clients.len(),
            files_this_period,
            total_files: self.stats.total_files(),
            total_tickets: self.tickets.total_count(),
            open_tickets: self.tickets.open_count(),
            warning_count: moderation.warning_count(),
            muted_count: moderation.muted_users.len(),
            uptime_secs: (Utc::now() - self.stats.started_at()).num_seconds(),
        }
    }

    // Flush sites. Failures are logged and absorbed: the in-memory copy
    // stays authoritative until the next successful save.

    pub async fn flush_clients(&self) {
        store::log_flush_error(
            "clients",
            self.store
                .save_table(Table::Clients, &store::sorted(&self.ledger.clients))
                .await,
        );
    }

    pub async fn flush_tiers(&self) {
        store::log_flush_error(
            "access_tiers",
            self.store
                .save_table(Table::AccessTiers, &store::sorted(&self.ledger.tiers))
                .await,
        );
    }

    pub async fn flush_tickets(&self) {
        store::log_flush_error(
            "tickets",
            self.store
                .save_table(Table::Tickets, &store::sorted(&self.tickets.all))
                .await,
        );
    }

    pub async fn flush_moderation(&self) {
        let snapshot = self.moderation.read().clone();
        store::log_flush_error(
            "moderation",
            self.store.save_table(Table::Moderation, &snapshot).await,
        );
    }

    /// Flush every table: the periodic timer and graceful shutdown path.
    pub async fn flush_all(&self) {
        self.flush_clients().await;
        self.flush_tiers().await;
        self.flush_tickets().await;
        self.flush_moderation().await;
    }
}
