//! Command-side domain primitives.
//!
//! This module defines the building blocks for aggregates: state
//! reconstruction (`Apply`), command handling (`Handle`), logical deletion
//! (`Tombstone`) and [`Root`], the in-memory unit of work that pairs an
//! aggregate's state with its identity, its persisted version and the events
//! it has produced but not yet committed.

use std::mem;

use crate::{envelope::EventEnvelope, event::EventSet, version::Version};

/// Command-side entities that produce domain events.
///
/// Aggregates rebuild their state from events and validate commands via
/// [`Handle<C>`]. State must be derived from events alone: `apply` is a pure
/// fold step with no side effects.
pub trait Aggregate: Default + Sized {
    /// Aggregate type identifier used by the log store.
    ///
    /// This is combined with the aggregate ID to key streams.
    /// Use lowercase, kebab-case for consistency: `"order"`,
    /// `"user-account"`, etc.
    const KIND: &'static str;

    type Event: EventSet;
    type Error;
    type Id: Clone;

    /// Apply an event to update aggregate state.
    ///
    /// Called once per event, both while replaying history and when a new
    /// event is enqueued.
    fn apply(&mut self, event: &Self::Event);
}

/// Mutate an aggregate with a single domain event.
///
/// A convenient way to split [`Aggregate::apply`] into one impl per event
/// type:
///
/// ```ignore
/// impl Aggregate for Account {
///     fn apply(&mut self, event: &AccountEvent) {
///         match event {
///             AccountEvent::Deposited(e) => Apply::apply(self, e),
///             AccountEvent::Withdrawn(e) => Apply::apply(self, e),
///         }
///     }
/// }
/// ```
pub trait Apply<E> {
    fn apply(&mut self, event: &E);
}

/// Entry point for command handling.
///
/// Each command type gets its own implementation, letting the aggregate express
/// validation logic in a strongly typed way. A rejected command returns an
/// error and produces no events.
///
/// ```ignore
/// impl Handle<DepositFunds> for Account {
///     fn handle(&self, command: &DepositFunds) -> Result<Vec<Self::Event>, Self::Error> {
///         if command.amount <= 0 {
///             return Err("amount must be positive".into());
///         }
///         Ok(vec![FundsDeposited { amount: command.amount }.into()])
///     }
/// }
/// ```
pub trait Handle<C>: Aggregate {
    /// Handle a command and produce events.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the command is invalid for the current
    /// aggregate state.
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Aggregates that can be logically deleted by appending a terminal event.
pub trait Tombstone: Aggregate {
    /// Produce the event that marks this aggregate as deleted.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the aggregate cannot be deleted in its
    /// current state (for example, because it already is).
    fn tombstone(&self) -> Result<Self::Event, Self::Error>;
}

/// An aggregate instance together with its identity, persisted version and
/// uncommitted events.
///
/// A `Root` is owned by a single request at a time; it is never shared
/// between concurrent operations.
pub struct Root<A: Aggregate> {
    id: A::Id,
    version: Version,
    state: A,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> Root<A> {
    /// A brand-new aggregate with no history and no pending events.
    #[must_use]
    pub fn new(id: A::Id) -> Self {
        Self {
            id,
            version: Version::INITIAL,
            state: A::default(),
            pending: Vec::new(),
        }
    }

    /// A brand-new aggregate with its seed events already enqueued.
    #[must_use]
    pub fn initialize(id: A::Id, events: impl IntoIterator<Item = A::Event>) -> Self {
        let mut root = Self::new(id);
        for event in events {
            root.enqueue(event);
        }
        root
    }

    /// Rebuild an aggregate by folding its history in order.
    ///
    /// The resulting version is the number of events folded and nothing is
    /// left pending.
    #[must_use]
    pub fn from_history(
        id: A::Id,
        history: impl IntoIterator<Item = EventEnvelope<A::Event>>,
    ) -> Self {
        let mut state = A::default();
        let mut folded = 0;
        for envelope in history {
            state.apply(&envelope.payload);
            folded += 1;
        }
        Self {
            id,
            version: Version::INITIAL.advanced_by(folded),
            state,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &A::Id {
        &self.id
    }

    /// Persisted version: the number of committed events folded into state.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> A {
        self.state
    }

    #[must_use]
    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply `event` to the in-memory state and queue it for commit.
    pub fn enqueue(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.pending.push(event);
        tracing::trace!(
            aggregate_kind = A::KIND,
            pending = self.pending.len(),
            "event enqueued"
        );
    }

    /// Run a command and enqueue the events it produces.
    ///
    /// Returns the number of events enqueued. If the aggregate rejects the
    /// command nothing is enqueued.
    ///
    /// # Errors
    ///
    /// Returns the aggregate's error when the command violates a domain rule.
    pub fn execute<C>(&mut self, command: &C) -> Result<usize, A::Error>
    where
        A: Handle<C>,
    {
        let events = self.state.handle(command)?;
        let count = events.len();
        for event in events {
            self.enqueue(event);
        }
        Ok(count)
    }

    /// Take every uncommitted event, leaving the buffer empty.
    ///
    /// Calling this again without enqueuing anything returns an empty vector.
    pub fn dequeue_uncommitted_events(&mut self) -> Vec<A::Event> {
        mem::take(&mut self.pending)
    }

    /// Record a successful commit of the pending events at `version`.
    pub(crate) fn mark_committed(&mut self, version: Version) {
        let committed = self.dequeue_uncommitted_events();
        debug_assert_eq!(
            version,
            self.version.advanced_by(committed.len()),
            "store returned a version inconsistent with the committed batch"
        );
        self.version = version;
    }
}

impl<A> Clone for Root<A>
where
    A: Aggregate + Clone,
    A::Event: Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version,
            state: self.state.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Root<A>
where
    A: Aggregate + std::fmt::Debug,
    A::Id: std::fmt::Debug,
    A::Event: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("kind", &A::KIND)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish()
    }
}
