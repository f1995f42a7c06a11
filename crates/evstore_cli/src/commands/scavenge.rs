//! Scavenge command implementation.

use super::{format_size, open_existing, print_json, OutputFormat};
use evstore_core::scavenge::{AnyOf, DiscardUnresolvedLinks, MaxAge, MaxCount};
use evstore_core::{CancelToken, ScavengeResult};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Retention settings from the command line.
#[derive(Debug, Clone, Default)]
pub struct ScavengeOptions {
    /// Keep only the newest N events per stream.
    pub max_count: Option<u64>,
    /// Drop events older than this many seconds.
    pub max_age_secs: Option<u64>,
    /// Do not drop unresolvable links.
    pub keep_unresolved_links: bool,
    /// Seal the open chunk before scavenging.
    pub complete_chunk: bool,
}

impl ScavengeOptions {
    /// Builds the policy these options describe.
    pub fn policy(&self) -> AnyOf {
        let mut policy = AnyOf::default();
        if !self.keep_unresolved_links {
            policy = policy.with(DiscardUnresolvedLinks);
        }
        if let Some(n) = self.max_count {
            policy = policy.with(MaxCount(n));
        }
        if let Some(secs) = self.max_age_secs {
            policy = policy.with(MaxAge(Duration::from_secs(secs)));
        }
        policy
    }
}

/// Scavenge summary for output.
#[derive(Debug, Serialize)]
pub struct ScavengeReport {
    /// Pass id.
    pub scavenge_id: String,
    /// Sealed chunks examined.
    pub chunks_scanned: usize,
    /// Chunks rewritten.
    pub chunks_rewritten: usize,
    /// Records kept.
    pub records_kept: u64,
    /// Records dropped.
    pub records_discarded: u64,
    /// Events dropped from the index.
    pub events_discarded: u64,
    /// Bytes reclaimed.
    pub bytes_reclaimed: u64,
    /// Duration in milliseconds.
    pub elapsed_ms: u128,
}

impl From<&ScavengeResult> for ScavengeReport {
    fn from(result: &ScavengeResult) -> Self {
        Self {
            scavenge_id: result.scavenge_id.to_string(),
            chunks_scanned: result.chunks_scanned,
            chunks_rewritten: result.chunks_rewritten,
            records_kept: result.records_kept,
            records_discarded: result.records_discarded,
            events_discarded: result.events_discarded,
            bytes_reclaimed: result.bytes_reclaimed,
            elapsed_ms: result.elapsed.as_millis(),
        }
    }
}

/// Runs the scavenge command.
pub fn run(
    path: &Path,
    options: &ScavengeOptions,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    if options.complete_chunk {
        match db.complete_chunk() {
            Ok(number) => info!(chunk = number, "sealed open chunk"),
            // nothing to seal
            Err(evstore_core::CoreError::InvalidOperation { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let result = db.scavenge_with(options.policy(), CancelToken::new())?;
    let report = ScavengeReport::from(&result);

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Scavenge {}", report.scavenge_id);
            println!("  Chunks scanned:    {}", report.chunks_scanned);
            println!("  Chunks rewritten:  {}", report.chunks_rewritten);
            println!("  Records kept:      {}", report.records_kept);
            println!("  Records discarded: {}", report.records_discarded);
            println!("  Events discarded:  {}", report.events_discarded);
            println!(
                "  Reclaimed:         {}",
                format_size(report.bytes_reclaimed)
            );
            println!("  Elapsed:           {} ms", report.elapsed_ms);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::{Database, ExpectedVersion, NewEvent};

    #[test]
    fn scavenge_command_drops_old_events() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            for i in 0..4u8 {
                db.append("s", ExpectedVersion::Any, vec![NewEvent::new("t", vec![i])])
                    .unwrap();
            }
        }

        let options = ScavengeOptions {
            max_count: Some(1),
            complete_chunk: true,
            ..ScavengeOptions::default()
        };
        run(dir.path(), &options, OutputFormat::Json).unwrap();

        let db = Database::open(dir.path()).unwrap();
        let info = db.stream_info("s").unwrap();
        assert_eq!(info.last_event_number, 3);
        assert_eq!(info.event_count, 1);
    }
}
