//! Event envelopes and their metadata.
//!
//! Domain events stay free of infrastructure concerns. When an event is
//! persisted it is stamped with [`EventMetadata`] (identity, correlation and
//! causation ids, wall-clock time) supplied by a [`MetadataProvider`], and when
//! it is read back it is wrapped in an [`EventEnvelope`] that also records the
//! stream version it produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::version::Version;

/// Infrastructure metadata persisted alongside every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Fresh metadata with a new event id and the current time.
    #[must_use]
    pub fn new(correlation_id: Option<Uuid>, causation_id: Option<Uuid>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id,
            causation_id,
            timestamp: Utc::now(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Source of metadata for the events committed within one operation.
///
/// Called once per event, so implementations should hand out a fresh event
/// id each time.
pub trait MetadataProvider: Send + Sync {
    fn metadata(&self) -> EventMetadata;
}

/// Metadata provider carrying the correlation and causation ids of an
/// inbound request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
}

impl RequestMetadata {
    #[must_use]
    pub const fn new(correlation_id: Option<Uuid>, causation_id: Option<Uuid>) -> Self {
        Self {
            correlation_id,
            causation_id,
        }
    }
}

impl MetadataProvider for RequestMetadata {
    fn metadata(&self) -> EventMetadata {
        EventMetadata::new(self.correlation_id, self.causation_id)
    }
}

/// A decoded event read back from a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    pub payload: E,
    pub metadata: EventMetadata,
    /// Stream version reached once this event was appended.
    pub version: Version,
}

impl<E> EventEnvelope<E> {
    #[must_use]
    pub const fn new(payload: E, metadata: EventMetadata, version: Version) -> Self {
        Self {
            payload,
            metadata,
            version,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> E {
        self.payload
    }
}
