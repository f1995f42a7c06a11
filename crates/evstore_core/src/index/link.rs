//! Link resolution.
//!
//! A link event exists on its own: reading it never depends on its target.
//! Resolution is a separate step that may fail.

use crate::error::{CoreError, CoreResult};
use crate::index::event::{EventRecord, ReadEventResult};
use crate::index::reader::ReadIndex;
use crate::log::LinkTarget;

/// An event, and the link it was reached through if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    /// The target event, or the event itself for non-links.
    pub event: EventRecord,
    /// The link event, if `event` was reached through one.
    pub link: Option<EventRecord>,
}

impl ResolvedEvent {
    /// Returns the event as it was read: the link if there is one.
    #[must_use]
    pub fn original_event(&self) -> &EventRecord {
        self.link.as_ref().unwrap_or(&self.event)
    }

    /// Checks whether the event was reached through a link.
    #[must_use]
    pub fn is_resolved_link(&self) -> bool {
        self.link.is_some()
    }
}

/// Follows link events to their targets through the read index.
#[derive(Debug, Clone, Copy)]
pub struct LinkResolver<'a> {
    index: &'a ReadIndex,
}

impl<'a> LinkResolver<'a> {
    /// Creates a resolver over `index`.
    #[must_use]
    pub fn new(index: &'a ReadIndex) -> Self {
        Self { index }
    }

    /// Resolves one level of linking.
    ///
    /// A non-link event resolves to itself.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLink` if the payload does not parse,
    /// `LinkUnresolved` if the target is not indexed, or a read failure.
    pub fn resolve(&self, event: EventRecord) -> CoreResult<ResolvedEvent> {
        if !event.is_link() {
            return Ok(ResolvedEvent { event, link: None });
        }
        let target = LinkTarget::parse(&event.data)?;
        match self
            .index
            .read_event(&target.stream_id, target.event_number)?
        {
            ReadEventResult::Success(resolved) => Ok(ResolvedEvent {
                event: resolved,
                link: Some(event),
            }),
            ReadEventResult::NotFound => Err(CoreError::LinkUnresolved {
                target: target.to_string(),
            }),
        }
    }
}
