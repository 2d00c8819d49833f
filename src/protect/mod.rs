//! File-protection pipeline.
//!
//! The transform tool is an opaque external program. `.lua` inputs are
//! handed to it under a hard deadline; every other accepted extension
//! takes the local passthrough-with-marker path. Nothing here touches
//! quota: the caller consumes a unit only after a successful transform.

use crate::config::ProtectConfig;
use crate::error::{OpError, OpResult};
use crate::ids;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Marker prepended by the local passthrough transform.
const PASSTHROUGH_MARKER: &[u8] = b"--[ protected by wardend ]\n";

/// Transform strength presets understood by the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    Medium,
    #[default]
    Strong,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "Medium",
            Self::Strong => "Strong",
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Medium" | "medium" => Ok(Self::Medium),
            "Strong" | "strong" => Ok(Self::Strong),
            other => Err(OpError::Validation(format!("unknown preset: {other}"))),
        }
    }
}

/// A finished transform.
#[derive(Debug, Clone)]
pub struct ProtectOutcome {
    pub output: Vec<u8>,
    /// Preset actually applied; "None" on the passthrough path.
    pub preset_label: &'static str,
}

/// Lower-cased extension of a file name, with the leading dot.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// Screen a file before any work happens: extension allow-list first,
/// then the size cap.
pub fn validate_file(name: &str, size: u64, config: &ProtectConfig) -> OpResult<()> {
    let extension = file_extension(name).unwrap_or_default();
    if !config.allowed_extensions.contains(&extension) {
        return Err(OpError::Validation(format!(
            "unsupported file extension; allowed: {}",
            config.allowed_extensions.join(", ")
        )));
    }
    if size > config.max_file_size {
        return Err(OpError::Validation(format!(
            "file too large; maximum is {} MB",
            config.max_file_size / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Run the transform.
///
/// `.lua` goes through the external tool with a hard timeout: on expiry
/// the child is killed and the whole operation fails; no partial result
/// is ever returned. Other extensions get the marker prepended locally.
pub async fn protect_file(
    config: &ProtectConfig,
    file_name: &str,
    input: &[u8],
    preset: Preset,
) -> OpResult<ProtectOutcome> {
    let extension = file_extension(file_name).unwrap_or_default();
    if extension != ".lua" {
        let mut output = Vec::with_capacity(PASSTHROUGH_MARKER.len() + input.len());
        output.extend_from_slice(PASSTHROUGH_MARKER);
        output.extend_from_slice(input);
        return Ok(ProtectOutcome {
            output,
            preset_label: "None",
        });
    }

    run_transform_tool(config, input, preset).await
}

async fn run_transform_tool(
    config: &ProtectConfig,
    input: &[u8],
    preset: Preset,
) -> OpResult<ProtectOutcome> {
    if tokio::fs::metadata(&config.tool_path).await.is_err() {
        return Err(OpError::External(format!(
            "transform tool not found at {}",
            config.tool_path.display()
        )));
    }

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|e| OpError::External(format!("scratch dir unavailable: {e}")))?;
    let token = ids::opaque(8);
    let input_path = config.temp_dir.join(format!("input_{token}.lua"));
    let output_path = config.temp_dir.join(format!("output_{token}.lua"));

    tokio::fs::write(&input_path, input)
        .await
        .map_err(|e| OpError::External(format!("failed to stage input: {e}")))?;

    let result = {
        let mut child = Command::new(&config.interpreter)
            .arg(&config.tool_path)
            .arg("--preset")
            .arg(preset.as_str())
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OpError::External(format!("failed to launch transform tool: {e}")))?;

        match tokio::time::timeout(Duration::from_secs(config.timeout_secs), child.wait()).await {
            Err(_) => {
                // Deadline blown: terminate the child forcibly.
                let _ = child.kill().await;
                warn!(timeout_secs = config.timeout_secs, "Transform tool timed out");
                Err(OpError::Timeout)
            }
            Ok(Err(e)) => Err(OpError::External(format!("transform tool wait failed: {e}"))),
            Ok(Ok(status)) if !status.success() => Err(OpError::External(format!(
                "transform tool exited with {status}"
            ))),
            Ok(Ok(_)) => match tokio::fs::read(&output_path).await {
                Ok(bytes) if bytes.is_empty() => {
                    Err(OpError::External("transform produced an empty file".into()))
                }
                Ok(bytes) => Ok(ProtectOutcome {
                    output: bytes,
                    preset_label: preset.as_str(),
                }),
                Err(e) => Err(OpError::External(format!("transform output unreadable: {e}"))),
            },
        }
    };

    let _ = tokio::fs::remove_file(&input_path).await;
    let _ = tokio::fs::remove_file(&output_path).await;
    result
}
