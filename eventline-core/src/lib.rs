//! Core traits and types for the Eventline aggregate persistence library.
//!
//! This crate provides the foundational abstractions for persisting
//! event-sourced aggregates under optimistic concurrency:
//!
//! - [`aggregate`] - Command-side primitives (`Aggregate`, `Apply`, `Handle`, `Root`)
//! - [`event`] - Event marker traits and the kind registry (`DomainEvent`, `EventSet`)
//! - [`envelope`] - Event envelopes and metadata (`EventEnvelope`, `EventMetadata`)
//! - [`version`] - Stream version numbers (`Version`)
//! - [`repository`] - Aggregate lifecycle over a store (`Repository`)
//! - [`store`] - Append-only log abstraction (`LogStore`)
//! - [`scope`] - Request-scoped concurrency token (`AppendScope`)
//! - [`retry`] - Transient-failure handling (`RetryExecutor`, `RetryPolicy`)
//! - [`etag`] - `If-Match` / `ETag` mapping at the HTTP boundary
//! - [`concurrency`] - Optimistic concurrency conflicts
//! - [`error`] - The shared error taxonomy (`ErrorKind`)
//!
//! # Example
//!
//! ```
//! use eventline_core::store::inmemory;
//!
//! let store: inmemory::Store<String> = inmemory::Store::new();
//! ```
//!
//! Most users should depend on the [`eventline`](https://docs.rs/eventline)
//! crate, which re-exports these types with a flatter API surface.

pub mod aggregate;
pub mod concurrency;
pub mod envelope;
pub mod error;
pub mod etag;
pub mod event;
pub mod repository;
pub mod retry;
pub mod scope;
pub mod store;
pub mod version;
