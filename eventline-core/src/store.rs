//! Persistence layer abstractions.
//!
//! This module describes the storage contract (`LogStore`), the wire form of
//! events (`PersistableEvent`, `StoredEvent`) and the append/start error
//! types. A reference in-memory implementation lives in [`inmemory`].
//!
//! A store keeps one append-only stream per `(aggregate kind, id)` pair. Its
//! version is the number of events it holds. Appends are compare-and-append:
//! they succeed only if the caller's expected version equals the stored one,
//! and a rejected append leaves the stream untouched.
use std::{fmt, future::Future};

pub use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    concurrency::ConcurrencyConflict,
    envelope::EventMetadata,
    error::ErrorKind,
    event::{DomainEvent, encode},
    retry::Transient,
    version::Version,
};

pub mod inmemory;

/// Serialized event ready to be written to a store backend.
///
/// This is the boundary between the repository and a [`LogStore`], and the
/// persisted wire shape: `{ "type": ..., "data": ..., "metadata": ... }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistableEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
}

impl PersistableEvent {
    /// Serialize a single domain event under its kind tag.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be serialized.
    pub fn new<T>(event: &T, metadata: EventMetadata) -> Result<Self, serde_json::Error>
    where
        T: DomainEvent + Serialize,
    {
        let (kind, data) = encode(event)?;
        Ok(Self {
            kind: kind.to_string(),
            data,
            metadata,
        })
    }
}

/// Event materialized from a stream, with the version it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent<Id> {
    pub aggregate_kind: String,
    pub aggregate_id: Id,
    /// Stream version once this event was appended (first event is 1).
    pub version: Version,
    pub event: PersistableEvent,
}

/// Full contents of one existing stream.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedStream<Id> {
    pub events: Vec<StoredEvent<Id>>,
    pub version: Version,
}

/// Error from starting a new stream.
#[derive(Debug, Error)]
pub enum StartError<StoreError>
where
    StoreError: std::error::Error,
{
    /// A stream already exists for this identifier.
    #[error("stream already exists at version {current}")]
    AlreadyExists { current: Version },
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<E: std::error::Error> StartError<E> {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

impl<E: std::error::Error + Transient> Transient for StartError<E> {
    fn is_transient(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => false,
            Self::Store(e) => e.is_transient(),
        }
    }
}

/// Error from a version-checked append.
#[derive(Debug, Error)]
pub enum AppendError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer modified the stream since the expected version.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// No stream exists for this identifier.
    #[error("stream does not exist")]
    NotFound,
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<E: std::error::Error> AppendError<E> {
    /// Create a store error variant.
    pub const fn store(err: E) -> Self {
        Self::Store(err)
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::ConcurrencyConflict,
            Self::NotFound => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

impl<E: std::error::Error + Transient> Transient for AppendError<E> {
    fn is_transient(&self) -> bool {
        match self {
            // A conflict retried with the same expected version would either
            // fail again or overwrite a concurrent writer's intent.
            Self::Conflict(_) | Self::NotFound => false,
            Self::Store(e) => e.is_transient(),
        }
    }
}

/// Abstraction over an append-only, per-stream event log.
///
/// Implementations must apply each append atomically: either every event in
/// the batch is written and the version advances by the batch length, or
/// nothing is written.
pub trait LogStore: Send + Sync {
    /// Aggregate identifier type.
    ///
    /// Common choices: `Uuid`, `String`, or a domain newtype.
    type Id: Clone + fmt::Debug + Send + Sync + 'static;

    /// Store-specific error type, classified for retry.
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    /// Current version of a stream, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the lookup fails.
    fn stream_version<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
    ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a;

    /// Read a whole stream in append order.
    ///
    /// Returns `None` when the stream does not exist, which callers must be
    /// able to tell apart from an existing stream.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when reading fails.
    fn read_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
    ) -> impl Future<Output = Result<Option<LoadedStream<Self::Id>>, Self::Error>> + Send + 'a;

    /// Create a stream holding `events`, returning its new version.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::AlreadyExists`] if the stream exists, or
    /// [`StartError::Store`] if persistence fails.
    fn start_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
        events: NonEmpty<PersistableEvent>,
    ) -> impl Future<Output = Result<Version, StartError<Self::Error>>> + Send + 'a;

    /// Append `events` if the stream is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Conflict`] if the stored version differs,
    /// [`AppendError::NotFound`] if the stream does not exist, or
    /// [`AppendError::Store`] if persistence fails.
    fn append_to_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
        expected_version: Version,
        events: NonEmpty<PersistableEvent>,
    ) -> impl Future<Output = Result<Version, AppendError<Self::Error>>> + Send + 'a;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StreamKey<Id> {
    aggregate_kind: String,
    aggregate_id: Id,
}

impl<Id> StreamKey<Id> {
    pub(crate) fn new(aggregate_kind: impl Into<String>, aggregate_id: Id) -> Self {
        Self {
            aggregate_kind: aggregate_kind.into(),
            aggregate_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct ValueAdded {
        amount: i32,
    }

    impl DomainEvent for ValueAdded {
        const KIND: &'static str = "value-added";
    }

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct FakeError(&'static str, bool);

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            self.1
        }
    }

    #[test]
    fn persistable_event_uses_type_data_metadata_wire_shape() {
        let event = PersistableEvent::new(&ValueAdded { amount: 10 }, EventMetadata::default())
            .unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "value-added");
        assert_eq!(json["data"], serde_json::json!({ "amount": 10 }));
        assert!(json["metadata"]["eventId"].is_string());
        assert!(json["metadata"]["timestamp"].is_string());
    }

    #[test]
    fn persistable_event_roundtrips_type_tag() {
        let event = PersistableEvent::new(&ValueAdded { amount: 1 }, EventMetadata::default())
            .unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let decoded: PersistableEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind, ValueAdded::KIND);
        assert_eq!(decoded, event);
    }

    #[test]
    fn conflicts_are_never_transient() {
        let err: AppendError<FakeError> = ConcurrencyConflict {
            expected: Some(Version::new(1)),
            actual: Some(Version::new(2)),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
    }

    #[test]
    fn store_errors_defer_to_inner_classification() {
        let transient: AppendError<FakeError> = AppendError::store(FakeError("timeout", true));
        let fatal: AppendError<FakeError> = AppendError::store(FakeError("corrupt", false));
        assert!(transient.is_transient());
        assert!(!fatal.is_transient());

        let start: StartError<FakeError> = StartError::Store(FakeError("reset", true));
        assert!(start.is_transient());
        let exists: StartError<FakeError> = StartError::AlreadyExists {
            current: Version::new(3),
        };
        assert!(!exists.is_transient());
        assert_eq!(exists.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn not_found_maps_to_not_found_kind() {
        let err: AppendError<io::Error> = AppendError::NotFound;
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
