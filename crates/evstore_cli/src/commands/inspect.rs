//! Inspect command implementation.

use super::{format_size, open_existing, print_json, OutputFormat};
use evstore_core::ChunkInfo;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Flushed writer checkpoint.
    pub writer_checkpoint: u64,
    /// Number of chunks.
    pub chunk_count: usize,
    /// Number of sealed chunks.
    pub sealed_chunks: usize,
    /// Total size of chunk files in bytes.
    pub total_size: u64,
    /// Total number of records.
    pub record_count: usize,
    /// Number of streams.
    pub stream_count: usize,
    /// Number of indexed events.
    pub event_count: usize,
    /// Chunk details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<ChunkView>>,
    /// Stream details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<StreamView>>,
}

/// One chunk.
#[derive(Debug, Serialize)]
pub struct ChunkView {
    /// Chunk number.
    pub number: u32,
    /// Scavenge version.
    pub version: u32,
    /// First position covered.
    pub start_position: u64,
    /// End of the covered range.
    pub end_position: u64,
    /// Whether the chunk is sealed.
    pub sealed: bool,
    /// Records held.
    pub record_count: usize,
    /// File size in bytes.
    pub file_size: u64,
}

impl From<&ChunkInfo> for ChunkView {
    fn from(info: &ChunkInfo) -> Self {
        Self {
            number: info.number,
            version: info.version,
            start_position: info.start_position,
            end_position: info.end_position,
            sealed: info.sealed,
            record_count: info.record_count,
            file_size: info.file_size,
        }
    }
}

/// One stream.
#[derive(Debug, Serialize)]
pub struct StreamView {
    /// Stream id.
    pub stream_id: String,
    /// Last event number.
    pub last_event_number: i64,
    /// Indexed events, fewer than `last_event_number + 1` after scavenge.
    pub event_count: usize,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_chunks: bool,
    show_streams: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let chunk_infos = db.chunk_infos()?;
    let streams = db.streams();

    let result = InspectResult {
        path: path.display().to_string(),
        writer_checkpoint: db.writer_checkpoint(),
        chunk_count: chunk_infos.len(),
        sealed_chunks: chunk_infos.iter().filter(|c| c.sealed).count(),
        total_size: chunk_infos.iter().map(|c| c.file_size).sum(),
        record_count: chunk_infos.iter().map(|c| c.record_count).sum(),
        stream_count: streams.len(),
        event_count: streams.iter().map(|s| s.event_count).sum(),
        chunks: show_chunks.then(|| chunk_infos.iter().map(ChunkView::from).collect()),
        streams: show_streams.then(|| {
            streams
                .iter()
                .map(|s| StreamView {
                    stream_id: s.stream_id.clone(),
                    last_event_number: s.last_event_number,
                    event_count: s.event_count,
                })
                .collect()
        }),
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("EvStore Inspection");
    println!("==================");
    println!();
    println!("Path: {}", result.path);
    println!("Writer checkpoint: {}", result.writer_checkpoint);
    println!();
    println!("Chunks:");
    println!(
        "  Count:   {} ({} sealed)",
        result.chunk_count, result.sealed_chunks
    );
    println!("  Size:    {}", format_size(result.total_size));
    println!("  Records: {}", result.record_count);
    println!();
    println!("Streams:");
    println!("  Count:   {}", result.stream_count);
    println!("  Events:  {}", result.event_count);

    if let Some(chunks) = &result.chunks {
        println!();
        println!("Chunk details:");
        for chunk in chunks {
            println!(
                "  #{}.{} [{}..{}) {} records, {}{}",
                chunk.number,
                chunk.version,
                chunk.start_position,
                chunk.end_position,
                chunk.record_count,
                format_size(chunk.file_size),
                if chunk.sealed { "" } else { " (open)" }
            );
        }
    }

    if let Some(streams) = &result.streams {
        println!();
        println!("Stream details:");
        for stream in streams {
            println!(
                "  {} last={} indexed={}",
                stream.stream_id, stream.last_event_number, stream.event_count
            );
        }
    }
}
