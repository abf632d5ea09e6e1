//! Domain event markers and the event-kind registry.
//!
//! `DomainEvent` is the lightweight trait every concrete event struct
//! implements. Aggregates group their events into a sum type implementing
//! [`EventSet`], which knows how to encode each variant and registers one
//! decoder per event kind in an [`EventRegistry`]. The registry is built once
//! when a repository is constructed; an unknown kind read back from a stream
//! is a checked [`EventDecodeError`], never a silent default.

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{envelope::EventMetadata, error::ErrorKind, store::PersistableEvent};

/// Marker trait for events that can be persisted by a log store.
///
/// Each event carries a unique [`Self::KIND`] tag so stored data can be routed
/// back to the correct type. Removing a field or adding a required one is a
/// breaking change and needs a new tag; adding optional fields is not.
pub trait DomainEvent {
    const KIND: &'static str;
}

/// Extension trait for getting the event kind from an event instance.
///
/// Blanket-implemented for every [`DomainEvent`]; you never implement it
/// yourself.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

/// Sum type of all events one aggregate can produce.
///
/// ```ignore
/// impl EventSet for OrderEvent {
///     fn to_persistable(&self, metadata: EventMetadata) -> Result<PersistableEvent, serde_json::Error> {
///         match self {
///             Self::Placed(e) => PersistableEvent::new(e, metadata),
///             Self::Cancelled(e) => PersistableEvent::new(e, metadata),
///         }
///     }
///
///     fn register(registry: &mut EventRegistry<Self>) -> Result<(), DuplicateEventKind> {
///         registry.register::<OrderPlaced>()?.register::<OrderCancelled>()?;
///         Ok(())
///     }
/// }
/// ```
pub trait EventSet: Sized {
    /// Encode this event into its wire form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be serialized.
    fn to_persistable(
        &self,
        metadata: EventMetadata,
    ) -> Result<PersistableEvent, serde_json::Error>;

    /// Register a decoder for every event kind in this set.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEventKind`] if two variants share a tag.
    fn register(registry: &mut EventRegistry<Self>) -> Result<(), DuplicateEventKind>;
}

/// Two event types were registered under the same kind tag.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("event kind `{0}` is registered more than once")]
pub struct DuplicateEventKind(pub &'static str);

/// Error returned when decoding a stored event fails.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The event kind is not registered for this event set.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        /// The unrecognized event kind string.
        kind: String,
        /// The kinds this event set can decode.
        expected: Vec<&'static str>,
    },
    /// The payload did not match the registered type.
    #[error("failed to decode `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EventDecodeError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

type Decoder<E> = fn(serde_json::Value) -> Result<E, serde_json::Error>;

fn decode_as<T, E>(data: serde_json::Value) -> Result<E, serde_json::Error>
where
    T: DeserializeOwned + Into<E>,
{
    serde_json::from_value::<T>(data).map(Into::into)
}

/// Static table mapping event kind tags to decoders for an event set `E`.
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E> EventRegistry<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register the decoder for event type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEventKind`] if `T::KIND` is already registered.
    pub fn register<T>(&mut self) -> Result<&mut Self, DuplicateEventKind>
    where
        T: DomainEvent + DeserializeOwned + Into<E>,
    {
        if self.decoders.contains_key(T::KIND) {
            return Err(DuplicateEventKind(T::KIND));
        }
        self.decoders.insert(T::KIND, decode_as::<T, E>);
        Ok(self)
    }

    /// Registered kinds, sorted for stable diagnostics.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.decoders.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Decode a stored payload tagged with `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::UnknownKind`] for unregistered tags and
    /// [`EventDecodeError::Payload`] when the payload has the wrong shape.
    pub fn decode(&self, kind: &str, data: serde_json::Value) -> Result<E, EventDecodeError> {
        let Some(decoder) = self.decoders.get(kind) else {
            return Err(EventDecodeError::UnknownKind {
                kind: kind.to_string(),
                expected: self.kinds(),
            });
        };
        decoder(data).map_err(|source| EventDecodeError::Payload {
            kind: kind.to_string(),
            source,
        })
    }
}

impl<E: EventSet> EventRegistry<E> {
    /// Build the registry for every kind in the event set `E`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEventKind`] if the set registers a tag twice.
    pub fn for_event_set() -> Result<Self, DuplicateEventKind> {
        let mut registry = Self::new();
        E::register(&mut registry)?;
        tracing::trace!(kinds = ?registry.kinds(), "built event registry");
        Ok(registry)
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Serialize a single event payload, keeping its kind tag.
pub(crate) fn encode<T>(event: &T) -> Result<(&'static str, serde_json::Value), serde_json::Error>
where
    T: DomainEvent + Serialize,
{
    Ok((T::KIND, serde_json::to_value(event)?))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct ValueAdded {
        amount: i32,
    }

    impl DomainEvent for ValueAdded {
        const KIND: &'static str = "value-added";
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct ValueReset;

    impl DomainEvent for ValueReset {
        const KIND: &'static str = "value-reset";
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct AlsoValueAdded {
        amount: i32,
    }

    impl DomainEvent for AlsoValueAdded {
        const KIND: &'static str = "value-added";
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum CounterEvent {
        Added(ValueAdded),
        Reset(ValueReset),
    }

    impl From<ValueAdded> for CounterEvent {
        fn from(event: ValueAdded) -> Self {
            Self::Added(event)
        }
    }

    impl From<ValueReset> for CounterEvent {
        fn from(event: ValueReset) -> Self {
            Self::Reset(event)
        }
    }

    impl From<AlsoValueAdded> for CounterEvent {
        fn from(event: AlsoValueAdded) -> Self {
            Self::Added(ValueAdded {
                amount: event.amount,
            })
        }
    }

    fn registry() -> EventRegistry<CounterEvent> {
        let mut registry = EventRegistry::new();
        registry
            .register::<ValueAdded>()
            .unwrap()
            .register::<ValueReset>()
            .unwrap();
        registry
    }

    #[test]
    fn kind_matches_const() {
        assert_eq!(ValueAdded { amount: 1 }.kind(), ValueAdded::KIND);
    }

    #[test]
    fn decodes_registered_kind() {
        let event = registry()
            .decode("value-added", serde_json::json!({ "amount": 7 }))
            .unwrap();
        assert_eq!(event, CounterEvent::Added(ValueAdded { amount: 7 }));
    }

    #[test]
    fn unknown_kind_is_a_checked_error() {
        let err = registry()
            .decode("value-doubled", serde_json::json!({}))
            .unwrap_err();
        match err {
            EventDecodeError::UnknownKind { kind, expected } => {
                assert_eq!(kind, "value-doubled");
                assert_eq!(expected, vec!["value-added", "value-reset"]);
            }
            EventDecodeError::Payload { .. } => panic!("expected unknown kind"),
        }
    }

    #[test]
    fn wrong_payload_shape_is_reported_with_kind() {
        let err = registry()
            .decode("value-added", serde_json::json!({ "wrong_field": 1 }))
            .unwrap_err();
        assert!(matches!(err, EventDecodeError::Payload { ref kind, .. } if kind == "value-added"));
        assert!(err.to_string().contains("value-added"));
    }

    #[test]
    fn new_optional_fields_are_ignored_on_decode() {
        let event = registry()
            .decode(
                "value-added",
                serde_json::json!({ "amount": 3, "note": "added later" }),
            )
            .unwrap();
        assert_eq!(event, CounterEvent::Added(ValueAdded { amount: 3 }));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry.register::<AlsoValueAdded>().unwrap_err();
        assert_eq!(err, DuplicateEventKind("value-added"));
    }

    #[test]
    fn encode_keeps_kind_tag() {
        let (kind, data) = encode(&ValueAdded { amount: 2 }).unwrap();
        assert_eq!(kind, "value-added");
        assert_eq!(data, serde_json::json!({ "amount": 2 }));
    }
}
