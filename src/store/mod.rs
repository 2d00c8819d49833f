//! Durable table persistence.
//!
//! One JSON file per logical table, each written independently: there is
//! no cross-table transaction. A table that fails to parse at load time
//! is replaced by its documented default and the others are unaffected,
//! so a corrupted ticket file cannot lose client data. Save failures are
//! logged, not retried, and never roll back in-memory state; the working
//! copy stays authoritative until the next successful save or restart.

use crate::ledger::{AccessTier, ClientAccount, TierId, UserId};
use crate::moderation::ModerationState;
use crate::tickets::Ticket;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The durable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Clients,
    AccessTiers,
    Tickets,
    Moderation,
}

impl Table {
    fn file_name(&self) -> &'static str {
        match self {
            Self::Clients => "clients.json",
            Self::AccessTiers => "access_tiers.json",
            Self::Tickets => "tickets.json",
            Self::Moderation => "moderation.json",
        }
    }
}

/// Everything read at startup, with per-table corruption already absorbed.
#[derive(Debug, Default)]
pub struct LoadedTables {
    pub clients: HashMap<UserId, ClientAccount>,
    pub tiers: HashMap<TierId, AccessTier>,
    pub tickets: HashMap<String, Ticket>,
    pub moderation: ModerationState,
}

/// Handle to the data directory.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn table_path(&self, table: Table) -> PathBuf {
        self.data_dir.join(table.file_name())
    }

    fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }

    /// Create the data and transcript directories.
    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(self.transcripts_dir()).await?;
        Ok(())
    }

    /// Load every table. Never fails: a missing file is a first run, a
    /// corrupt file becomes its default, and either way startup proceeds.
    pub async fn load(&self) -> LoadedTables {
        LoadedTables {
            clients: self.load_table(Table::Clients).await,
            tiers: self.load_table(Table::AccessTiers).await,
            tickets: self.load_table(Table::Tickets).await,
            moderation: self.load_table(Table::Moderation).await,
        }
    }

    async fn load_table<T: DeserializeOwned + Default>(&self, table: Table) -> T {
        let path = self.table_path(table);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return T::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read table, using defaults");
                return T::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid table format, resetting to defaults");
                T::default()
            }
        }
    }

    /// Serialize one table to its own file.
    pub async fn save_table<T: Serialize>(&self, table: Table, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(self.table_path(table), bytes).await?;
        Ok(())
    }

    /// Write a closed ticket's transcript: plain `[author] content` lines
    /// in chronological order, one text file per ticket.
    pub async fn save_transcript(&self, ticket_id: &str, lines: &[String]) -> Result<(), StoreError> {
        let path = self.transcripts_dir().join(format!("{ticket_id}.txt"));
        tokio::fs::write(path, lines.join("\n")).await?;
        Ok(())
    }

    /// Read a transcript back, if one was captured.
    pub async fn read_transcript(&self, ticket_id: &str) -> Option<String> {
        let path = self.transcripts_dir().join(format!("{ticket_id}.txt"));
        tokio::fs::read_to_string(path).await.ok()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Collect a concurrent table into sorted form for stable output.
pub fn sorted<K: Ord + Clone + std::hash::Hash, V: Clone>(
    map: &dashmap::DashMap<K, V>,
) -> BTreeMap<K, V> {
    map.iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect()
}

/// Log-and-continue wrapper for flush sites.
pub fn log_flush_error(table: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        warn!(table = %table, error = %e, "Durable flush failed; in-memory state kept");
    }
}

/// Announce a completed load.
pub fn log_loaded(tables: &LoadedTables) {
    info!(
        clients = tables.clients.len(),
        tiers = tables.tiers.len(),
        tickets = tables.tickets.len(),
        warnings = tables.moderation.warning_count(),
        "Durable tables loaded"
    );
}
