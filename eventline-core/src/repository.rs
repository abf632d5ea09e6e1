//! Aggregate persistence orchestration.
//!
//! `Repository` is the only component that talks to the [`LogStore`]. It
//! mediates the read-modify-write cycle: replay a stream into a [`Root`], let
//! the caller run domain operations that enqueue events, then append those
//! events under the optimistic-concurrency contract. Every store call goes
//! through the repository's [`RetryExecutor`], which absorbs transient
//! failures but hands conflicts straight back.
//!
//! The concurrency guarantee is enforced at append time, not at read time:
//! two requests may load the same version concurrently, and the store lets at
//! most one of them append on top of it.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering},
};

use nonempty::NonEmpty;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{Aggregate, Root, Tombstone},
    concurrency::ConcurrencyConflict,
    envelope::{EventEnvelope, MetadataProvider},
    error::ErrorKind,
    event::{DuplicateEventKind, EventDecodeError, EventRegistry, EventSet},
    retry::{RetryError, RetryExecutor, RetryPolicy},
    scope::{AppendScope, ScopeReused},
    store::{AppendError, LoadedStream, LogStore, PersistableEvent, StartError},
    version::Version,
};

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError<DomainError, StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("aggregate not found")]
    NotFound,
    #[error("stream already exists at version {current}")]
    AlreadyExists { current: Version },
    #[error(transparent)]
    Concurrency(ConcurrencyConflict),
    #[error("aggregate rejected operation: {0}")]
    Domain(DomainError),
    #[error("store unavailable after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("store timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("operation cancelled")]
    Cancelled,
    #[error("cannot {operation} aggregate: {reason}")]
    InvalidAggregate {
        operation: &'static str,
        reason: &'static str,
    },
    #[error("failed to decode stored event: {0}")]
    Decode(#[source] EventDecodeError),
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stream reports version {stored} but holds {folded} events")]
    VersionMismatch { stored: Version, folded: Version },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    #[error(transparent)]
    Scope(#[from] ScopeReused),
}

impl<D, E> RepositoryError<D, E>
where
    E: std::error::Error + 'static,
{
    /// Taxonomy category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Concurrency(_) => ErrorKind::ConcurrencyConflict,
            Self::Domain(_) => ErrorKind::DomainRuleViolation,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidAggregate { .. }
            | Self::Decode(_)
            | Self::Encode(_)
            | Self::VersionMismatch { .. }
            | Self::Store(_)
            | Self::Scope(_) => ErrorKind::Internal,
        }
    }

    fn from_read(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::TimedOut { attempts } => Self::Timeout { attempts },
            RetryError::Exhausted { attempts, source } => Self::Transient { attempts, source },
            RetryError::Rejected(source) => Self::Store(source),
        }
    }

    fn from_start(err: RetryError<StartError<E>>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::TimedOut { attempts } => Self::Timeout { attempts },
            RetryError::Exhausted {
                attempts,
                source: StartError::Store(source),
            } => Self::Transient { attempts, source },
            RetryError::Exhausted {
                source: StartError::AlreadyExists { current },
                ..
            }
            | RetryError::Rejected(StartError::AlreadyExists { current }) => {
                Self::AlreadyExists { current }
            }
            RetryError::Rejected(StartError::Store(source)) => Self::Store(source),
        }
    }

    fn from_append(err: RetryError<AppendError<E>>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::TimedOut { attempts } => Self::Timeout { attempts },
            RetryError::Exhausted {
                attempts,
                source: AppendError::Store(source),
            } => Self::Transient { attempts, source },
            RetryError::Exhausted {
                source: AppendError::Conflict(conflict),
                ..
            }
            | RetryError::Rejected(AppendError::Conflict(conflict)) => Self::Concurrency(conflict),
            RetryError::Exhausted {
                source: AppendError::NotFound,
                ..
            }
            | RetryError::Rejected(AppendError::NotFound) => Self::NotFound,
            RetryError::Rejected(AppendError::Store(source)) => Self::Store(source),
        }
    }
}

/// Result type alias for repository operations on aggregate `A` over store
/// `S`.
pub type RepositoryResult<T, A, S> =
    Result<T, RepositoryError<<A as Aggregate>::Error, <S as LogStore>::Error>>;

/// Repository for one aggregate type over one log store.
pub struct Repository<A, S>
where
    A: Aggregate,
    S: LogStore,
{
    pub(crate) store: S,
    registry: EventRegistry<A::Event>,
    retry: RetryExecutor,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> Repository<A, S>
where
    A: Aggregate<Id = S::Id>,
    S: LogStore,
{
    /// Create a repository, building the event registry for `A::Event`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEventKind`] if the aggregate's event set registers
    /// a kind tag twice.
    pub fn new(store: S) -> Result<Self, DuplicateEventKind> {
        Ok(Self {
            store,
            registry: EventRegistry::for_event_set()?,
            retry: RetryExecutor::default(),
            _aggregate: PhantomData,
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    #[must_use]
    pub const fn event_store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn registry(&self) -> &EventRegistry<A::Event> {
        &self.registry
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Current stream version without replaying events.
    ///
    /// # Errors
    ///
    /// Returns a store, timeout or cancellation error.
    #[tracing::instrument(skip(self, cancel), fields(aggregate_kind = A::KIND))]
    pub async fn version(
        &self,
        id: &S::Id,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Version>, A, S> {
        self.retry
            .run(cancel, move || self.store.stream_version(A::KIND, id))
            .await
            .map_err(RepositoryError::from_read)
    }

    /// Load an aggregate by replaying its whole stream.
    ///
    /// Returns `Ok(None)` if the stream does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Decode`] if a stored event has an unknown
    /// kind or malformed payload, or a store, timeout or cancellation error.
    #[tracing::instrument(skip(self, cancel), fields(aggregate_kind = A::KIND))]
    pub async fn find(
        &self,
        id: &S::Id,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Root<A>>, A, S> {
        let stream = self
            .retry
            .run(cancel, move || self.store.read_stream(A::KIND, id))
            .await
            .map_err(RepositoryError::from_read)?;

        let Some(stream) = stream else {
            tracing::debug!("stream not found");
            return Ok(None);
        };

        let root = self.replay(id, stream)?;
        tracing::debug!(version = %root.version(), "aggregate loaded");
        Ok(Some(root))
    }

    /// Load an aggregate, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the stream does not exist,
    /// plus every error [`Self::find`] can return.
    pub async fn get(
        &self,
        id: &S::Id,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Root<A>, A, S> {
        self.find(id, cancel)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Start the stream for a new aggregate from its pending events.
    ///
    /// The aggregate must be at version zero with at least one pending event.
    /// On success its pending events are cleared and its version advanced.
    /// Creation always expects no stream, so an expected version on `scope`
    /// must be absent or [`Version::INITIAL`].
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AlreadyExists`] if the stream exists,
    /// [`RepositoryError::Concurrency`] if `scope` expects a later version,
    /// [`RepositoryError::InvalidAggregate`] if the aggregate is not new, or a
    /// store, timeout, cancellation or scope error.
    #[tracing::instrument(
        skip(self, root, scope),
        fields(aggregate_kind = A::KIND, aggregate_id = ?root.id(), pending = root.pending().len())
    )]
    pub async fn add(
        &self,
        root: &mut Root<A>,
        scope: &mut AppendScope,
    ) -> RepositoryResult<Version, A, S> {
        if scope.is_used() {
            return Err(ScopeReused.into());
        }
        if !root.version().is_initial() {
            return Err(RepositoryError::InvalidAggregate {
                operation: "add",
                reason: "aggregate already has committed events",
            });
        }
        if let Some(expected) = scope.expected().filter(|v| !v.is_initial()) {
            let actual = self.version(root.id(), scope.cancellation()).await?;
            tracing::debug!(%expected, ?actual, "creation expected an existing version");
            return Err(RepositoryError::Concurrency(ConcurrencyConflict {
                expected: Some(expected),
                actual,
            }));
        }

        let metadata = scope.metadata_provider();
        let Some(batch) = encode(root, metadata.as_ref()).map_err(RepositoryError::Encode)? else {
            return Err(RepositoryError::InvalidAggregate {
                operation: "add",
                reason: "aggregate has no events to start its stream",
            });
        };

        let cancel = scope.cancellation().clone();
        scope
            .run(move |_| self.start(root, batch, cancel))
            .await
    }

    /// Load an aggregate, mutate it and append the events it enqueued.
    ///
    /// Returns the new stream version. See [`Self::get_and_update`].
    ///
    /// # Errors
    ///
    /// As for [`Self::get_and_update`].
    pub async fn update<F>(
        &self,
        id: &S::Id,
        scope: &mut AppendScope,
        mutate: F,
    ) -> RepositoryResult<Version, A, S>
    where
        F: FnOnce(&mut Root<A>) -> Result<(), A::Error>,
    {
        self.get_and_update(id, scope, mutate)
            .await
            .map(|root| root.version())
    }

    /// Load an aggregate, mutate it and append the events it enqueued,
    /// returning the committed aggregate.
    ///
    /// The append expects the version on `scope` if one was supplied, and the
    /// version observed at load time otherwise. A supplied version that is
    /// already stale fails before `mutate` runs. If `mutate` enqueues nothing
    /// no append happens and the loaded version is reported.
    ///
    /// This is not a transaction spanning the read: a concurrent writer is
    /// detected only when the append is attempted.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if the stream does not exist
    /// - [`RepositoryError::Concurrency`] if the stream moved past the
    ///   expected version (never retried)
    /// - [`RepositoryError::Domain`] if `mutate` rejects the operation, in
    ///   which case nothing is appended
    /// - store, timeout, cancellation, codec or scope errors
    #[tracing::instrument(
        skip(self, scope, mutate),
        fields(aggregate_kind = A::KIND, expected = ?scope.expected())
    )]
    pub async fn get_and_update<F>(
        &self,
        id: &S::Id,
        scope: &mut AppendScope,
        mutate: F,
    ) -> RepositoryResult<Root<A>, A, S>
    where
        F: FnOnce(&mut Root<A>) -> Result<(), A::Error>,
    {
        if scope.is_used() {
            return Err(ScopeReused.into());
        }

        let cancel = scope.cancellation().clone();
        let mut root = self.get(id, &cancel).await?;

        if let Some(expected) = scope.expected() {
            if expected != root.version() {
                tracing::debug!(%expected, actual = %root.version(), "stale expected version");
                return Err(RepositoryError::Concurrency(ConcurrencyConflict {
                    expected: Some(expected),
                    actual: Some(root.version()),
                }));
            }
        }

        mutate(&mut root).map_err(RepositoryError::Domain)?;

        let metadata = scope.metadata_provider();
        let batch = encode(&root, metadata.as_ref()).map_err(RepositoryError::Encode)?;

        let root_ref = &mut root;
        scope
            .run(move |expected| self.append(root_ref, expected, batch, cancel))
            .await?;

        Ok(root)
    }

    /// Logically delete an aggregate by appending its tombstone event.
    ///
    /// # Errors
    ///
    /// As for [`Self::update`]; a tombstone the aggregate refuses to produce
    /// surfaces as [`RepositoryError::Domain`].
    pub async fn delete(
        &self,
        id: &S::Id,
        scope: &mut AppendScope,
    ) -> RepositoryResult<Version, A, S>
    where
        A: Tombstone,
    {
        self.update(id, scope, |root| {
            let tombstone = root.state().tombstone()?;
            root.enqueue(tombstone);
            Ok(())
        })
        .await
    }

    async fn start(
        &self,
        root: &mut Root<A>,
        batch: NonEmpty<PersistableEvent>,
        cancel: CancellationToken,
    ) -> RepositoryResult<Version, A, S> {
        let id = root.id();
        let attempts = AtomicU32::new(0);
        let (tries, events) = (&attempts, &batch);
        let outcome = self
            .retry
            .run(&cancel, move || {
                tries.fetch_add(1, Ordering::Relaxed);
                self.store.start_stream(A::KIND, id, events.clone())
            })
            .await;

        let version = match outcome {
            Ok(version) => version,
            Err(RetryError::Rejected(StartError::AlreadyExists { current }))
                if attempts.load(Ordering::Relaxed) > 1 =>
            {
                if !self
                    .already_committed(id, Version::INITIAL, &batch, &cancel)
                    .await?
                {
                    return Err(RepositoryError::AlreadyExists { current });
                }
                tracing::debug!(%current, "earlier attempt created the stream");
                Version::INITIAL.advanced_by(batch.len())
            }
            Err(err) => return Err(RepositoryError::from_start(err)),
        };
        root.mark_committed(version);
        tracing::debug!(%version, "aggregate added");
        Ok(version)
    }

    async fn append(
        &self,
        root: &mut Root<A>,
        expected: Option<Version>,
        batch: Option<NonEmpty<PersistableEvent>>,
        cancel: CancellationToken,
    ) -> RepositoryResult<Version, A, S> {
        let Some(batch) = batch else {
            tracing::debug!("no events enqueued, nothing to append");
            return Ok(root.version());
        };

        let expected = expected.unwrap_or(root.version());
        let id = root.id();
        let attempts = AtomicU32::new(0);
        let (tries, events) = (&attempts, &batch);
        let outcome = self
            .retry
            .run(&cancel, move || {
                tries.fetch_add(1, Ordering::Relaxed);
                self.store
                    .append_to_stream(A::KIND, id, expected, events.clone())
            })
            .await;

        let version = match outcome {
            Ok(version) => version,
            Err(RetryError::Rejected(AppendError::Conflict(conflict)))
                if attempts.load(Ordering::Relaxed) > 1 =>
            {
                if !self.already_committed(id, expected, &batch, &cancel).await? {
                    return Err(RepositoryError::Concurrency(conflict));
                }
                tracing::debug!(actual = ?conflict.actual, "earlier attempt appended the batch");
                expected.advanced_by(batch.len())
            }
            Err(err) => return Err(RepositoryError::from_append(err)),
        };
        root.mark_committed(version);
        tracing::debug!(%version, "aggregate updated");
        Ok(version)
    }

    /// Whether `batch` is already stored directly after `expected`.
    ///
    /// An attempt that timed out or failed transiently may still have been
    /// committed, in which case its retry collides with its own events. The
    /// batch is encoded once, so a match on event ids identifies it.
    async fn already_committed(
        &self,
        id: &S::Id,
        expected: Version,
        batch: &NonEmpty<PersistableEvent>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<bool, A, S> {
        let stream = self
            .retry
            .run(cancel, move || self.store.read_stream(A::KIND, id))
            .await
            .map_err(RepositoryError::from_read)?;
        let Some(stream) = stream else {
            return Ok(false);
        };

        let skip = usize::try_from(expected.get()).unwrap_or(usize::MAX);
        let stored = stream
            .events
            .iter()
            .skip(skip)
            .take(batch.len())
            .map(|stored| stored.event.metadata.event_id);
        Ok(stored.eq(batch.iter().map(|event| event.metadata.event_id)))
    }

    fn replay(&self, id: &S::Id, stream: LoadedStream<S::Id>) -> RepositoryResult<Root<A>, A, S> {
        let stored_version = stream.version;
        let history = stream
            .events
            .into_iter()
            .map(|stored| {
                let payload = self.registry.decode(&stored.event.kind, stored.event.data)?;
                Ok(EventEnvelope::new(
                    payload,
                    stored.event.metadata,
                    stored.version,
                ))
            })
            .collect::<Result<Vec<_>, EventDecodeError>>()
            .map_err(RepositoryError::Decode)?;

        let root = Root::from_history(id.clone(), history);
        if root.version() != stored_version {
            tracing::error!(
                folded = %root.version(),
                stored = %stored_version,
                "stream version disagrees with its event count"
            );
            return Err(RepositoryError::VersionMismatch {
                stored: stored_version,
                folded: root.version(),
            });
        }
        Ok(root)
    }
}

/// Encode the pending events of `root`, or `None` if there are none.
fn encode<A: Aggregate>(
    root: &Root<A>,
    metadata: &dyn MetadataProvider,
) -> Result<Option<NonEmpty<PersistableEvent>>, serde_json::Error> {
    let events = root
        .pending()
        .iter()
        .map(|event| event.to_persistable(metadata.metadata()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NonEmpty::from_vec(events))
}

impl<A, S> std::fmt::Debug for Repository<A, S>
where
    A: Aggregate,
    S: LogStore + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_kind", &A::KIND)
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish()
    }
}
