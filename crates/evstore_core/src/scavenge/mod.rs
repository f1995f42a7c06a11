//! Scavenge: reclaiming space from sealed chunks.
//!
//! A pass first asks a [`RetentionPolicy`] about every committed event in
//! the sealed chunks, settling what to drop before anything changes. It
//! then walks the sealed chunks oldest first, builds a new version of each
//! chunk holding only what is kept, and swaps it in atomically. The open
//! chunk is never touched.
//!
//! Whatever the policy says, the last event of every stream is kept. Its
//! event number is what optimistic appends check against, so dropping it
//! would let a stream's version move backwards.

mod handle;
mod policy;
mod scavenger;

pub use handle::{CancelToken, ProgressSnapshot, ScavengeHandle, ScavengeProgress};
pub use policy::{
    AnyOf, Decision, DiscardSet, DiscardUnresolvedLinks, KeepAll, MaxAge, MaxCount,
    RetentionContext, RetentionPolicy,
};
pub use scavenger::{ScavengeMarker, ScavengeResult, ScavengeStatus, Scavenger};
