//! Configuration loading and management.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server identity and storage paths.
    #[serde(default)]
    pub server: ServerConfig,
    /// Privileged role and owner identifiers.
    #[serde(default)]
    pub roles: RolesConfig,
    /// Ticket provisioning knobs.
    #[serde(default)]
    pub tickets: TicketsConfig,
    /// File-protection pipeline knobs.
    #[serde(default)]
    pub protect: ProtectConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Gateway credential. Provided by the embedding gateway's environment;
    /// the core never interprets it.
    pub credential: Option<String>,
    /// Directory holding the durable tables and transcripts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds between periodic durable flushes (default: 300).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Per-user-per-command cooldown in seconds (default: 3). Zero
    /// disables the cooldown.
    #[serde(default = "default_command_cooldown")]
    pub command_cooldown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            credential: None,
            data_dir: default_data_dir(),
            flush_interval_secs: default_flush_interval(),
            command_cooldown_secs: default_command_cooldown(),
        }
    }
}

/// Role identifiers used by the gateway to compute capability flags.
///
/// The core never resolves these itself; they are carried here so the
/// gateway and the ticket channel permission overrides agree on one source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RolesConfig {
    /// Admin role identifier.
    #[serde(default)]
    pub admin_role: Option<String>,
    /// Support role identifier.
    #[serde(default)]
    pub support_role: Option<String>,
    /// Owner user identifiers.
    #[serde(default)]
    pub owner_ids: Vec<String>,
}

/// Ticket provisioning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketsConfig {
    /// Parent category handle for ticket channels, if the platform has one.
    #[serde(default)]
    pub parent_category: Option<String>,
    /// Seconds between closing a ticket and deleting its channel
    /// (default: 10). Participants can read the final state in the window.
    #[serde(default = "default_close_grace")]
    pub close_grace_secs: u64,
    /// Messages fetched for the closing transcript (default: 100).
    #[serde(default = "default_transcript_limit")]
    pub transcript_limit: usize,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            parent_category: None,
            close_grace_secs: default_close_grace(),
            transcript_limit: default_transcript_limit(),
        }
    }
}

/// File-protection pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectConfig {
    /// Interpreter the transform tool runs under (default: "lua").
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Path to the transform tool script.
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,
    /// Scratch directory for transform inputs/outputs.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Maximum accepted input size in bytes (default: 50 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Accepted file extensions, with the leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Hard deadline for one transform invocation, in seconds
    /// (default: 65). On expiry the child process is killed.
    #[serde(default = "default_transform_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProtectConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            tool_path: default_tool_path(),
            temp_dir: default_temp_dir(),
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            timeout_secs: default_transform_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_flush_interval() -> u64 {
    300
}

fn default_command_cooldown() -> u64 {
    3
}

fn default_close_grace() -> u64 {
    10
}

fn default_transcript_limit() -> usize {
    100
}

fn default_interpreter() -> String {
    "lua".to_string()
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("prometheus-main.lua")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    [".lua", ".js", ".json", ".txt", ".md", ".zip", ".rar"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_transform_timeout() -> u64 {
    65
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("data"));
        assert_eq!(config.server.flush_interval_secs, 300);
        assert_eq!(config.server.command_cooldown_secs, 3);
        assert_eq!(config.tickets.close_grace_secs, 10);
        assert_eq!(config.protect.max_file_size, 50 * 1024 * 1024);
        assert!(config.protect.allowed_extensions.contains(&".lua".to_string()));
        assert!(config.roles.owner_ids.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            data_dir = "/var/lib/wardend"
            flush_interval_secs = 60

            [roles]
            admin_role = "admins"
            owner_ids = ["100", "200"]

            [tickets]
            close_grace_secs = 5

            [protect]
            max_file_size = 1024
            allowed_extensions = [".lua"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/wardend"));
        assert_eq!(config.roles.owner_ids.len(), 2);
        assert_eq!(config.tickets.close_grace_secs, 5);
        assert_eq!(config.protect.allowed_extensions, vec![".lua".to_string()]);
    }
}
