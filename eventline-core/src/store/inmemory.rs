//! In-memory log store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`LogStore`](super::LogStore) suitable for unit tests and examples.
//!
//! # Example
//!
//! ```
//! use eventline_core::store::inmemory;
//!
//! let store: inmemory::Store<String> = inmemory::Store::new();
//! ```

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    concurrency::ConcurrencyConflict,
    retry::Transient,
    store::{
        AppendError, LoadedStream, LogStore, PersistableEvent, StartError, StoredEvent, StreamKey,
    },
    version::Version,
};

type InMemoryStream<Id> = Vec<StoredEvent<Id>>;

/// In-memory log store that keeps streams in a hash map.
///
/// Each stream's version is its length. A single write lock covers the
/// version check and the append, which makes every append atomic.
#[derive(Clone)]
pub struct Store<Id> {
    inner: Arc<RwLock<HashMap<StreamKey<Id>, InMemoryStream<Id>>>>,
}

impl<Id> Store<Id> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<Id> Default for Store<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> std::fmt::Debug for Store<Id> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let streams = self.inner.read().map(|streams| streams.len()).ok();
        f.debug_struct("Store").field("streams", &streams).finish()
    }
}

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

impl Transient for InMemoryError {
    fn is_transient(&self) -> bool {
        false
    }
}

fn stamp<Id: Clone>(
    aggregate_kind: &str,
    aggregate_id: &Id,
    from: Version,
    events: NonEmpty<PersistableEvent>,
) -> Vec<StoredEvent<Id>> {
    events
        .into_iter()
        .enumerate()
        .map(|(offset, event)| StoredEvent {
            aggregate_kind: aggregate_kind.to_string(),
            aggregate_id: aggregate_id.clone(),
            version: from.advanced_by(offset + 1),
            event,
        })
        .collect()
}

impl<Id> LogStore for Store<Id>
where
    Id: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    type Error = InMemoryError;
    type Id = Id;

    #[tracing::instrument(skip(self))]
    fn stream_version<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
    ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a {
        let stream_key = StreamKey::new(aggregate_kind, aggregate_id.clone());
        let version = self.inner.read().map_err(|_| InMemoryError::Poisoned).map(|streams| {
            streams
                .get(&stream_key)
                .map(|stream| Version::INITIAL.advanced_by(stream.len()))
        });
        tracing::trace!(?version, "retrieved stream version");
        std::future::ready(version)
    }

    #[tracing::instrument(skip(self))]
    fn read_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
    ) -> impl Future<Output = Result<Option<LoadedStream<Self::Id>>, Self::Error>> + Send + 'a
    {
        let stream_key = StreamKey::new(aggregate_kind, aggregate_id.clone());
        let result = self.inner.read().map_err(|_| InMemoryError::Poisoned).map(|streams| {
            streams.get(&stream_key).map(|stream| LoadedStream {
                events: stream.clone(),
                version: Version::INITIAL.advanced_by(stream.len()),
            })
        });
        if let Ok(Some(stream)) = &result {
            tracing::debug!(events_loaded = stream.events.len(), "loaded stream");
        }
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn start_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
        events: NonEmpty<PersistableEvent>,
    ) -> impl Future<Output = Result<Version, StartError<Self::Error>>> + Send + 'a {
        let result = (|| -> Result<Version, StartError<InMemoryError>> {
            let mut streams = self
                .inner
                .write()
                .map_err(|_| StartError::Store(InMemoryError::Poisoned))?;
            let stream_key = StreamKey::new(aggregate_kind, aggregate_id.clone());

            if let Some(existing) = streams.get(&stream_key) {
                let current = Version::INITIAL.advanced_by(existing.len());
                tracing::debug!(%current, "stream already exists, rejecting start");
                return Err(StartError::AlreadyExists { current });
            }

            let stored = stamp(aggregate_kind, aggregate_id, Version::INITIAL, events);
            let version = Version::INITIAL.advanced_by(stored.len());
            streams.insert(stream_key, stored);
            drop(streams);
            tracing::debug!(%version, "stream started");
            Ok(version)
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn append_to_stream<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a Self::Id,
        expected_version: Version,
        events: NonEmpty<PersistableEvent>,
    ) -> impl Future<Output = Result<Version, AppendError<Self::Error>>> + Send + 'a {
        let result = (|| -> Result<Version, AppendError<InMemoryError>> {
            let mut streams = self
                .inner
                .write()
                .map_err(|_| AppendError::store(InMemoryError::Poisoned))?;
            let stream_key = StreamKey::new(aggregate_kind, aggregate_id.clone());

            let Some(stream) = streams.get_mut(&stream_key) else {
                tracing::debug!("stream does not exist, rejecting append");
                return Err(AppendError::NotFound);
            };

            let current = Version::INITIAL.advanced_by(stream.len());
            if current != expected_version {
                tracing::debug!(
                    expected = %expected_version,
                    %current,
                    "version mismatch, rejecting append"
                );
                return Err(ConcurrencyConflict {
                    expected: Some(expected_version),
                    actual: Some(current),
                }
                .into());
            }

            stream.extend(stamp(aggregate_kind, aggregate_id, current, events));
            let version = Version::INITIAL.advanced_by(stream.len());
            drop(streams);
            tracing::debug!(%version, "events appended to stream");
            Ok(version)
        })();

        std::future::ready(result)
    }
}
