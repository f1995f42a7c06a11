//! Property-based test generators using proptest.
//!
//! Provides strategies for generating store histories and retention
//! policies.

use evstore_core::scavenge::{
    Decision, DiscardUnresolvedLinks, KeepAll, MaxCount, RetentionContext, RetentionPolicy,
};
use evstore_core::{CoreResult, Database, EventRecord, ExpectedVersion, NewEvent};
use proptest::prelude::*;

/// Streams holding ordinary events.
pub const DATA_STREAMS: [&str; 3] = ["orders", "users", "audit"];

/// Streams holding links. A link may point into any stream, links
/// included, so histories hold chains of links.
pub const LINK_STREAMS: [&str; 2] = ["by-type", "$ce-orders"];

fn any_stream() -> Vec<&'static str> {
    DATA_STREAMS.iter().chain(&LINK_STREAMS).copied().collect()
}

/// Strategy for generating event payloads.
pub fn event_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..96)
}

/// Strategy for generating stream ids.
pub fn stream_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// One step of a generated history.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Append events to a data stream in one transaction.
    Append {
        /// Target stream.
        stream: &'static str,
        /// Event payloads.
        events: Vec<Vec<u8>>,
    },
    /// Append a link to a link stream.
    Link {
        /// Stream receiving the link.
        stream: &'static str,
        /// Stream linked into.
        target_stream: &'static str,
        /// Linked event number, which may not exist.
        target_number: i64,
    },
    /// Seal the open chunk.
    CompleteChunk,
}

impl StoreOp {
    /// Applies the operation to `db`.
    ///
    /// Sealing an empty chunk is not an error here.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn apply(&self, db: &Database) -> CoreResult<()> {
        match self {
            Self::Append { stream, events } => {
                let events = events
                    .iter()
                    .map(|data| NewEvent::new("Generated", data.clone()))
                    .collect();
                db.append(stream, ExpectedVersion::Any, events)?;
            }
            Self::Link {
                stream,
                target_stream,
                target_number,
            } => {
                db.append(
                    stream,
                    ExpectedVersion::Any,
                    vec![NewEvent::link_to(*target_stream, *target_number)],
                )?;
            }
            Self::CompleteChunk => match db.complete_chunk() {
                Ok(_) | Err(evstore_core::CoreError::InvalidOperation { .. }) => {}
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}

/// Strategy for generating a single operation.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        6 => (
            prop::sample::select(DATA_STREAMS.to_vec()),
            prop::collection::vec(event_data_strategy(), 1..4),
        )
            .prop_map(|(stream, events)| StoreOp::Append { stream, events }),
        3 => (
            prop::sample::select(LINK_STREAMS.to_vec()),
            prop::sample::select(any_stream()),
            0i64..12,
        )
            .prop_map(|(stream, target_stream, target_number)| StoreOp::Link {
                stream,
                target_stream,
                target_number,
            }),
        1 => Just(StoreOp::CompleteChunk),
    ]
}

/// Strategy for generating a history of operations.
pub fn store_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..max_ops)
}

/// Applies every operation, then seals the open chunk so everything is
/// eligible for scavenge.
///
/// # Errors
///
/// Returns the first failing operation.
pub fn apply_ops(db: &Database, ops: &[StoreOp]) -> CoreResult<()> {
    for op in ops {
        op.apply(db)?;
    }
    StoreOp::CompleteChunk.apply(db)
}

/// A retention policy picked by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChoice {
    /// [`KeepAll`].
    KeepAll,
    /// [`DiscardUnresolvedLinks`].
    DiscardUnresolvedLinks,
    /// [`MaxCount`].
    MaxCount(u64),
    /// Discards everything it is asked about.
    DiscardAll,
}

impl RetentionPolicy for PolicyChoice {
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        match self {
            Self::KeepAll => KeepAll.decide(ctx, event),
            Self::DiscardUnresolvedLinks => DiscardUnresolvedLinks.decide(ctx, event),
            Self::MaxCount(n) => MaxCount(*n).decide(ctx, event),
            Self::DiscardAll => Decision::Discard,
        }
    }
}

/// Strategy for generating retention policies.
pub fn policy_strategy() -> impl Strategy<Value = PolicyChoice> {
    prop_oneof![
        Just(PolicyChoice::KeepAll),
        Just(PolicyChoice::DiscardUnresolvedLinks),
        (0u64..4).prop_map(PolicyChoice::MaxCount),
        Just(PolicyChoice::DiscardAll),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_histories_apply() {
        let mut runner = TestRunner::default();
        let ops = store_ops_strategy(40)
            .new_tree(&mut runner)
            .unwrap()
            .current();
        let db = Database::open_in_memory().unwrap();
        apply_ops(&db, &ops).unwrap();
        let infos = db.chunk_infos().unwrap();
        assert!(!infos.last().unwrap().sealed);
        assert!(infos[..infos.len() - 1].iter().all(|c| c.sealed));
    }

    proptest! {
        #[test]
        fn stream_ids_are_non_empty(id in stream_id_strategy()) {
            prop_assert!(!id.is_empty());
        }
    }
}
