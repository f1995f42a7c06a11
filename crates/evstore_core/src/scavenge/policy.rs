//! Retention policies.
//!
//! A policy decides, event by event, what scavenge may drop. It never has
//! the last word on a stream's last event: the engine keeps that event
//! whatever the policy says.

use crate::index::{EventRecord, IndexSnapshot};
use crate::log::LinkTarget;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Outcome of a retention decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the event.
    Keep,
    /// The event may be dropped.
    Discard,
}

/// Events a pass has already chosen to drop.
#[derive(Debug, Clone, Default)]
pub struct DiscardSet {
    streams: HashMap<String, HashSet<i64>>,
}

impl DiscardSet {
    /// Checks whether the pass drops `event_number@stream_id`.
    #[must_use]
    pub fn contains(&self, stream_id: &str, event_number: i64) -> bool {
        self.streams
            .get(stream_id)
            .is_some_and(|numbers| numbers.contains(&event_number))
    }

    /// Returns the number of events chosen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.values().map(HashSet::len).sum()
    }

    /// Checks whether nothing was chosen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub(crate) fn insert(&mut self, stream_id: &str, event_number: i64) {
        self.streams
            .entry(stream_id.to_string())
            .or_default()
            .insert(event_number);
    }
}

/// What a policy can see besides the event itself.
///
/// Link events that a policy keeps are asked about again whenever the
/// pass grows `discarded`, until no answer changes.
#[derive(Debug, Clone, Copy)]
pub struct RetentionContext<'a> {
    /// Index state at the start of the pass.
    pub snapshot: &'a IndexSnapshot,
    /// Events the pass drops so far.
    pub discarded: &'a DiscardSet,
    /// Last event number of the event's stream.
    pub last_event_number: i64,
    /// Wall-clock time of the pass, unix milliseconds.
    pub now: i64,
}

impl RetentionContext<'_> {
    /// Checks whether an event is indexed and survives the pass so far.
    #[must_use]
    pub fn is_available(&self, stream_id: &str, event_number: i64) -> bool {
        self.snapshot.contains(stream_id, event_number)
            && !self.discarded.contains(stream_id, event_number)
    }
}

/// Decides which committed events scavenge may drop.
///
/// Implemented for closures, so ad-hoc policies need no new type:
///
/// ```rust
/// use evstore_core::scavenge::{Decision, RetentionPolicy};
///
/// let drop_snapshots = |_: &evstore_core::scavenge::RetentionContext<'_>,
///                       event: &evstore_core::EventRecord| {
///     if event.event_type == "Snapshot" { Decision::Discard } else { Decision::Keep }
/// };
/// let _policy: &dyn RetentionPolicy = &drop_snapshots;
/// ```
pub trait RetentionPolicy: Send + Sync {
    /// Decides the fate of one committed event.
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision;
}

impl<F> RetentionPolicy for F
where
    F: Fn(&RetentionContext<'_>, &EventRecord) -> Decision + Send + Sync,
{
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        self(ctx, event)
    }
}

/// Keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl RetentionPolicy for KeepAll {
    fn decide(&self, _ctx: &RetentionContext<'_>, _event: &EventRecord) -> Decision {
        Decision::Keep
    }
}

/// Drops link events whose target is not indexed or is dropped by the
/// same pass.
///
/// Links with a malformed payload are kept: they point nowhere in
/// particular, so nothing proves their target is gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardUnresolvedLinks;

impl RetentionPolicy for DiscardUnresolvedLinks {
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        if !event.is_link() {
            return Decision::Keep;
        }
        match LinkTarget::parse(&event.data) {
            Ok(target) if !ctx.is_available(&target.stream_id, target.event_number) => {
                Decision::Discard
            }
            _ => Decision::Keep,
        }
    }
}

/// Keeps only the newest `n` events of each stream.
#[derive(Debug, Clone, Copy)]
pub struct MaxCount(pub u64);

impl RetentionPolicy for MaxCount {
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        let behind = ctx.last_event_number.saturating_sub(event.event_number);
        if u64::try_from(behind).is_ok_and(|behind| behind < self.0) {
            Decision::Keep
        } else {
            Decision::Discard
        }
    }
}

/// Drops events older than the given age.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl RetentionPolicy for MaxAge {
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        let max_age = i64::try_from(self.0.as_millis()).unwrap_or(i64::MAX);
        if ctx.now.saturating_sub(event.timestamp) > max_age {
            Decision::Discard
        } else {
            Decision::Keep
        }
    }
}

/// Drops an event if any of its policies does.
#[derive(Default)]
pub struct AnyOf(pub Vec<Box<dyn RetentionPolicy>>);

impl AnyOf {
    /// Adds a policy.
    #[must_use]
    pub fn with(mut self, policy: impl RetentionPolicy + 'static) -> Self {
        self.0.push(Box::new(policy));
        self
    }
}

impl RetentionPolicy for AnyOf {
    fn decide(&self, ctx: &RetentionContext<'_>, event: &EventRecord) -> Decision {
        if self
            .0
            .iter()
            .any(|policy| policy.decide(ctx, event) == Decision::Discard)
        {
            Decision::Discard
        } else {
            Decision::Keep
        }
    }
}

impl fmt::Debug for AnyOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyOf").field(&self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexEntry, StreamHistory};
    use crate::log::PrepareFlags;
    use std::sync::Arc;
    use uuid::Uuid;

    fn event(number: i64, timestamp: i64, link: Option<&str>) -> EventRecord {
        let (flags, data) = match link {
            Some(target) => (PrepareFlags::IS_LINK_TO, target.as_bytes().to_vec()),
            None => (PrepareFlags::DATA, Vec::new()),
        };
        EventRecord {
            stream_id: "s".into(),
            event_number: number,
            event_id: Uuid::nil(),
            event_type: "t".into(),
            data,
            metadata: Vec::new(),
            flags,
            timestamp,
            log_position: 0,
            commit_position: 0,
        }
    }

    fn ctx<'a>(
        snapshot: &'a IndexSnapshot,
        discarded: &'a DiscardSet,
        last: i64,
    ) -> RetentionContext<'a> {
        RetentionContext {
            snapshot,
            discarded,
            last_event_number: last,
            now: 10_000,
        }
    }

    #[test]
    fn unresolved_links_are_discarded() {
        let snapshot = IndexSnapshot::default();
        let none = DiscardSet::default();
        let policy = DiscardUnresolvedLinks;
        assert_eq!(
            policy.decide(&ctx(&snapshot, &none, 5), &event(0, 0, Some("11@test-stream"))),
            Decision::Discard
        );
        assert_eq!(
            policy.decide(&ctx(&snapshot, &none, 5), &event(0, 0, Some("garbage"))),
            Decision::Keep
        );
        assert_eq!(
            policy.decide(&ctx(&snapshot, &none, 5), &event(0, 0, None)),
            Decision::Keep
        );
    }

    #[test]
    fn max_count_keeps_newest() {
        let snapshot = IndexSnapshot::default();
        let none = DiscardSet::default();
        let policy = MaxCount(2);
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 9), &event(9, 0, None)), Decision::Keep);
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 9), &event(8, 0, None)), Decision::Keep);
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 9), &event(7, 0, None)), Decision::Discard);
    }

    #[test]
    fn max_age_uses_pass_time() {
        let snapshot = IndexSnapshot::default();
        let none = DiscardSet::default();
        let policy = MaxAge(Duration::from_secs(1));
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 0), &event(0, 9_500, None)), Decision::Keep);
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 0), &event(0, 8_000, None)), Decision::Discard);
    }

    #[test]
    fn any_of_and_closures() {
        let snapshot = IndexSnapshot::default();
        let none = DiscardSet::default();
        let policy = AnyOf::default()
            .with(KeepAll)
            .with(|_: &RetentionContext<'_>, e: &EventRecord| {
                if e.event_number == 3 {
                    Decision::Discard
                } else {
                    Decision::Keep
                }
            });
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 9), &event(3, 0, None)), Decision::Discard);
        assert_eq!(policy.decide(&ctx(&snapshot, &none, 9), &event(4, 0, None)), Decision::Keep);
    }

    #[test]
    fn links_into_discarded_events_are_discarded() {
        let mut history = StreamHistory::default();
        for n in 0..3 {
            history.insert(
                n,
                IndexEntry {
                    prepare_position: n as u64 * 10,
                    commit_position: n as u64 * 10 + 5,
                },
            );
        }
        let snapshot = IndexSnapshot::new(HashMap::from([("x".to_string(), Arc::new(history))]));
        let mut discarded = DiscardSet::default();
        let link = event(0, 0, Some("1@x"));

        assert!(discarded.is_empty());
        assert_eq!(
            DiscardUnresolvedLinks.decide(&ctx(&snapshot, &discarded, 5), &link),
            Decision::Keep
        );

        discarded.insert("x", 1);
        assert_eq!(discarded.len(), 1);
        let ctx = ctx(&snapshot, &discarded, 5);
        assert!(!ctx.is_available("x", 1));
        assert!(ctx.is_available("x", 2));
        assert_eq!(DiscardUnresolvedLinks.decide(&ctx, &link), Decision::Discard);
    }
}
