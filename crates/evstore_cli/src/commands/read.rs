//! Read command implementation.

use super::{open_existing, preview, print_json, EventView, OutputFormat};
use evstore_core::{CoreError, Database, EventRecord, SliceStatus, TFPos};
use serde::Serialize;
use std::path::Path;

/// What to read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Stream to read; the whole log if `None`.
    pub stream: Option<String>,
    /// First event number of a stream read.
    pub from: Option<i64>,
    /// Maximum number of events.
    pub limit: usize,
    /// Read newest first.
    pub backward: bool,
    /// Follow links.
    pub resolve: bool,
}

/// One line of read output.
#[derive(Debug, Serialize)]
pub struct ReadEntry {
    /// The event as stored.
    pub event: EventView,
    /// The link target, when resolving and it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<EventView>,
    /// Why a link did not resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<String>,
}

/// Runs the read command.
pub fn run(
    path: &Path,
    options: &ReadOptions,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let events = match &options.stream {
        Some(stream) => read_stream(&db, stream, options)?,
        None => read_all(&db, options)?,
    };

    let entries = events
        .iter()
        .map(|event| entry(&db, event, options.resolve))
        .collect::<Result<Vec<_>, _>>()?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => print_text_output(&entries),
    }
    Ok(())
}

fn read_stream(
    db: &Database,
    stream: &str,
    options: &ReadOptions,
) -> Result<Vec<EventRecord>, CoreError> {
    let slice = if options.backward {
        db.read_stream_backward(stream, options.from.unwrap_or(-1), options.limit)?
    } else {
        db.read_stream_forward(stream, options.from.unwrap_or(0), options.limit)?
    };
    if slice.status == SliceStatus::NoStream {
        eprintln!("stream '{stream}' does not exist");
    }
    Ok(slice.events)
}

fn read_all(db: &Database, options: &ReadOptions) -> Result<Vec<EventRecord>, CoreError> {
    let slice = if options.backward {
        db.read_all_backward(TFPos::head(db.writer_checkpoint()), options.limit)?
    } else {
        db.read_all_forward(TFPos::START, options.limit)?
    };
    Ok(slice.events.into_iter().map(|(_, event)| event).collect())
}

fn entry(db: &Database, event: &EventRecord, resolve: bool) -> Result<ReadEntry, CoreError> {
    let mut entry = ReadEntry {
        event: EventView::from(event),
        resolved: None,
        unresolved: None,
    };
    if resolve && event.is_link() {
        match db.resolve_link(event.clone()) {
            Ok(resolved) => entry.resolved = Some(EventView::from(&resolved.event)),
            Err(e @ (CoreError::LinkUnresolved { .. } | CoreError::MalformedLink { .. })) => {
                entry.unresolved = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(entry)
}

fn print_text_output(entries: &[ReadEntry]) {
    for entry in entries {
        let event = &entry.event;
        println!(
            "{}#{} [{}] {} {}",
            event.stream_id,
            event.event_number,
            event.commit_position,
            event.event_type,
            preview(event.data.as_bytes(), 80)
        );
        if let Some(target) = &entry.resolved {
            println!(
                "    -> {}#{} {} {}",
                target.stream_id,
                target.event_number,
                target.event_type,
                preview(target.data.as_bytes(), 80)
            );
        }
        if let Some(reason) = &entry.unresolved {
            println!("    -> {reason}");
        }
    }
    println!();
    println!("Total: {} events", entries.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::{ExpectedVersion, NewEvent};

    #[test]
    fn links_are_resolved_on_request() {
        let db = Database::open_in_memory().unwrap();
        db.append("t", ExpectedVersion::Any, vec![NewEvent::new("x", b"target".to_vec())])
            .unwrap();
        db.append(
            "links",
            ExpectedVersion::Any,
            vec![NewEvent::link_to("t", 0), NewEvent::link_to("t", 7)],
        )
        .unwrap();

        let options = ReadOptions {
            stream: Some("links".into()),
            from: None,
            limit: 10,
            backward: false,
            resolve: true,
        };
        let events = read_stream(&db, "links", &options).unwrap();
        let entries: Vec<ReadEntry> = events
            .iter()
            .map(|e| entry(&db, e, true).unwrap())
            .collect();
        assert_eq!(entries[0].resolved.as_ref().unwrap().data, "target");
        assert!(entries[1].unresolved.as_ref().unwrap().contains("7@t"));
    }

    #[test]
    fn all_log_backward_is_reverse() {
        let db = Database::open_in_memory().unwrap();
        for stream in ["a", "b", "c"] {
            db.append(stream, ExpectedVersion::Any, vec![NewEvent::new("x", Vec::new())])
                .unwrap();
        }
        let forward = ReadOptions {
            stream: None,
            from: None,
            limit: 10,
            backward: false,
            resolve: false,
        };
        let backward = ReadOptions {
            backward: true,
            ..forward.clone()
        };
        let mut f: Vec<String> = read_all(&db, &forward)
            .unwrap()
            .into_iter()
            .map(|e| e.stream_id)
            .collect();
        let b: Vec<String> = read_all(&db, &backward)
            .unwrap()
            .into_iter()
            .map(|e| e.stream_id)
            .collect();
        f.reverse();
        assert_eq!(f, b);
    }
}
