//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod read;
pub mod scavenge;
pub mod verify;

use clap::ValueEnum;
use evstore_core::{Config, Database, EventRecord};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors reported by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("store path required for {0}")]
    PathRequired(&'static str),

    /// No store at the given path.
    #[error("no store found at {0}")]
    NoStore(String),

    /// Verification found damage.
    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store; never creates one.
pub fn open_existing(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CliError::NoStore(path.display().to_string()).into());
    }
    let config = Config::default().create_if_missing(false);
    Ok(Database::open_with_config(path, config)?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// An event as printed by `read`.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Stream id.
    pub stream_id: String,
    /// Event number.
    pub event_number: i64,
    /// Event type.
    pub event_type: String,
    /// Event id.
    pub event_id: String,
    /// Payload as text, lossily decoded.
    pub data: String,
    /// Metadata as text, lossily decoded.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    /// Whether the payload is JSON.
    pub is_json: bool,
    /// Whether the event is a link.
    pub is_link: bool,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    /// Prepare position.
    pub log_position: u64,
    /// Commit position.
    pub commit_position: u64,
}

impl From<&EventRecord> for EventView {
    fn from(event: &EventRecord) -> Self {
        Self {
            stream_id: event.stream_id.clone(),
            event_number: event.event_number,
            event_type: event.event_type.clone(),
            event_id: event.event_id.to_string(),
            data: String::from_utf8_lossy(&event.data).into_owned(),
            metadata: String::from_utf8_lossy(&event.metadata).into_owned(),
            is_json: event.flags.is_json(),
            is_link: event.is_link(),
            timestamp: event.timestamp,
            log_position: event.log_position,
            commit_position: event.commit_position,
        }
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Shortens a payload for one-line output.
pub fn preview(data: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(data);
    if text.chars().count() <= max {
        text.into_owned()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
