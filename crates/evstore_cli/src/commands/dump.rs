//! Dump command implementation.

use super::{open_existing, preview, print_json, OutputFormat};
use evstore_core::scavenge::ScavengeMarker;
use evstore_core::LogRecord;
use serde::Serialize;
use std::path::Path;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Global log position.
    pub position: u64,
    /// Record type.
    pub record_type: String,
    /// Transaction position (prepares and commits).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_position: Option<u64>,
    /// Stream id (prepares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Stored event number, `-1` when assigned by the commit (prepares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_number: Option<i64>,
    /// Offset within the transaction (prepares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_offset: Option<u32>,
    /// Event type (prepares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Prepare flags, raw bits (prepares).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u16>,
    /// Payload preview (prepares and system records).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// First event number (commits).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_event_number: Option<i64>,
    /// System record kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_kind: Option<String>,
}

impl From<&LogRecord> for RecordInfo {
    fn from(record: &LogRecord) -> Self {
        let mut info = Self {
            position: record.position(),
            record_type: format!("{:?}", record.record_type()).to_uppercase(),
            transaction_position: None,
            stream_id: None,
            event_number: None,
            transaction_offset: None,
            event_type: None,
            flags: None,
            data: None,
            first_event_number: None,
            system_kind: None,
        };
        match record {
            LogRecord::Prepare(prepare) => {
                info.transaction_position = Some(prepare.transaction_position);
                info.stream_id = Some(prepare.stream_id.clone());
                info.event_number = Some(prepare.event_number);
                info.transaction_offset = Some(prepare.transaction_offset);
                info.event_type = Some(prepare.event_type.clone());
                info.flags = Some(prepare.flags.bits());
                info.data = Some(preview(&prepare.data, 64));
            }
            LogRecord::Commit(commit) => {
                info.transaction_position = Some(commit.transaction_position);
                info.first_event_number = Some(commit.first_event_number);
            }
            LogRecord::System(system) => {
                info.system_kind = Some(format!("{:?}", system.kind));
                info.data = Some(match ScavengeMarker::decode(&system.data) {
                    Some(marker) => match marker.status {
                        Some(status) => format!("scavenge {} {:?}", marker.scavenge_id, status),
                        None => format!("scavenge {}", marker.scavenge_id),
                    },
                    None => preview(&system.data, 64),
                });
            }
        }
        info
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: u64,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let max_records = limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    for record in db.scan_log(from)?.take(max_records) {
        records.push(RecordInfo::from(&record?));
    }

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Text => print_text_output(&records),
    }

    Ok(())
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Log Records");
    println!("===========");
    println!();

    for record in records {
        print!("[{:>10}] {:<8}", record.position, record.record_type);
        if let Some(tx) = record.transaction_position {
            print!(" tx={tx}");
        }
        if let Some(stream) = &record.stream_id {
            print!(" stream={stream}");
        }
        if let Some(offset) = record.transaction_offset {
            print!(" offset={offset}");
        }
        if let Some(number) = record.event_number {
            print!(" number={number}");
        }
        if let Some(event_type) = &record.event_type {
            print!(" type={event_type}");
        }
        if let Some(flags) = record.flags {
            print!(" flags={flags:#06x}");
        }
        if let Some(first) = record.first_event_number {
            print!(" first={first}");
        }
        if let Some(kind) = &record.system_kind {
            print!(" kind={kind}");
        }
        if let Some(data) = &record.data {
            print!(" data={data:?}");
        }
        println!();
    }

    println!();
    println!("Total: {} records", records.len());
}
