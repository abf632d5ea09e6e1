#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use eventline_core::test;
pub use eventline_core::{
    aggregate,
    aggregate::{Aggregate, Apply, Handle, Root, Tombstone},
    concurrency::ConcurrencyConflict,
    envelope,
    envelope::{EventEnvelope, EventMetadata, MetadataProvider, RequestMetadata},
    error::ErrorKind,
    etag,
    event,
    event::{DomainEvent, EventDecodeError, EventKind, EventRegistry, EventSet},
    repository,
    repository::{Repository, RepositoryError, RepositoryResult},
    retry,
    retry::{Backoff, RetryError, RetryExecutor, RetryPolicy, Transient},
    scope,
    scope::{AppendScope, ScopeReused},
    version::Version,
};
// Cancellation is part of every repository signature.
pub use tokio_util::sync::CancellationToken;

pub mod store {
    pub use eventline_core::store::{
        LoadedStream, LogStore, NonEmpty, PersistableEvent, StoredEvent,
    };

    // Error types for LogStore implementors. Repository users see these
    // folded into RepositoryError.
    pub use eventline_core::store::{AppendError, StartError};

    pub use eventline_core::store::inmemory;
}
