//! Verify command implementation.

use super::{open_existing, CliError};
use std::path::Path;

/// Runs the verify command.
///
/// Opening the store already checks chunk headers, footers and the writer
/// checkpoint, and replays the log into the index. The scan afterwards
/// decodes every record and checks its checksum and trailing length.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let db = match open_existing(path) {
        Ok(db) => db,
        Err(e) => {
            println!("✗ Store failed to open: {e}");
            return Err(CliError::VerificationFailed(e.to_string()).into());
        }
    };

    for chunk in db.chunk_infos()? {
        println!(
            "  chunk #{}.{}: {} records{}",
            chunk.number,
            chunk.version,
            chunk.record_count,
            if chunk.sealed { "" } else { " (open)" }
        );
    }

    println!();
    match db.verify() {
        Ok(records) => {
            println!("✓ Store verification passed ({records} records)");
            Ok(())
        }
        Err(e) => {
            println!("✗ Store verification failed: {e}");
            Err(CliError::VerificationFailed(e.to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::{Database, ExpectedVersion, NewEvent};

    #[test]
    fn healthy_store_verifies() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.append(
                "s",
                ExpectedVersion::Any,
                vec![NewEvent::new("t", b"x".to_vec())],
            )
            .unwrap();
        }
        run(dir.path()).unwrap();
    }

    #[test]
    fn empty_directory_is_not_a_store() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path()).is_err());
    }
}
