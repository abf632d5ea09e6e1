//! Request-scoped carrier for the optimistic-concurrency token.
//!
//! An [`AppendScope`] is built once per inbound request. It carries the
//! version the caller expects (typically parsed from `If-Match`) into a
//! write, captures the version the write produced (to be echoed as `ETag`),
//! and supplies the request's cancellation signal and event metadata.
//!
//! The scope is an ordinary value owned by the request handler. It is never
//! stored in shared or static state, so concurrent requests cannot observe
//! each other's tokens.

use std::{fmt, future::Future, sync::Arc};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    envelope::{EventMetadata, MetadataProvider, RequestMetadata},
    error::ErrorKind,
    version::Version,
};

/// An [`AppendScope`] was asked to run a second write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("append scope already ran a write for this request")]
pub struct ScopeReused;

impl ScopeReused {
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Expected version in, next version out, for exactly one write.
pub struct AppendScope {
    expected: Option<Version>,
    next: Option<Version>,
    used: bool,
    metadata: Arc<dyn MetadataProvider>,
    cancel: CancellationToken,
}

impl AppendScope {
    /// A scope with no expected version, default metadata and a fresh
    /// cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expected: None,
            next: None,
            used: false,
            metadata: Arc::new(RequestMetadata::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Require the write to start from `version`.
    #[must_use]
    pub fn expecting(mut self, version: Version) -> Self {
        self.expected = Some(version);
        self
    }

    #[must_use]
    pub fn with_expected(mut self, version: Option<Version>) -> Self {
        self.expected = version;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, provider: impl MetadataProvider + 'static) -> Self {
        self.metadata = Arc::new(provider);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn expected(&self) -> Option<Version> {
        self.expected
    }

    /// Version produced by the write, once it has succeeded.
    #[must_use]
    pub const fn next(&self) -> Option<Version> {
        self.next
    }

    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Metadata for the next event committed under this scope.
    #[must_use]
    pub fn event_metadata(&self) -> EventMetadata {
        self.metadata.metadata()
    }

    /// Shared handle to the metadata provider, for use inside [`Self::run`].
    #[must_use]
    pub fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        Arc::clone(&self.metadata)
    }

    /// Run the write for this request.
    ///
    /// `handler` receives the expected version and returns the version it
    /// produced, which is recorded and readable through [`Self::next`]. A
    /// scope runs at most one handler: a second call fails with
    /// [`ScopeReused`] without invoking `handler`, and because `run` borrows
    /// the scope mutably a handler cannot re-enter its own scope.
    ///
    /// # Errors
    ///
    /// Returns the handler's error unchanged, or [`ScopeReused`] converted
    /// into `E`.
    pub async fn run<F, Fut, E>(&mut self, handler: F) -> Result<Version, E>
    where
        F: FnOnce(Option<Version>) -> Fut,
        Fut: Future<Output = Result<Version, E>>,
        E: From<ScopeReused>,
    {
        if self.used {
            tracing::warn!(expected = ?self.expected, "append scope reused within one request");
            return Err(ScopeReused.into());
        }
        self.used = true;

        let next = handler(self.expected).await?;
        tracing::trace!(expected = ?self.expected, %next, "append scope captured next version");
        self.next = Some(next);
        Ok(next)
    }
}

impl Default for AppendScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AppendScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendScope")
            .field("expected", &self.expected)
            .field("next", &self.next)
            .field("used", &self.used)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, PartialEq, Eq, Error)]
    enum TestError {
        #[error(transparent)]
        Reused(#[from] ScopeReused),
        #[error("store down")]
        Down,
    }

    #[tokio::test]
    async fn run_passes_expected_and_captures_next() {
        let mut scope = AppendScope::new().expecting(Version::new(4));

        let next = scope
            .run(|expected| async move {
                assert_eq!(expected, Some(Version::new(4)));
                Ok::<_, TestError>(Version::new(6))
            })
            .await
            .unwrap();

        assert_eq!(next, Version::new(6));
        assert_eq!(scope.next(), Some(Version::new(6)));
        assert!(scope.is_used());
    }

    #[tokio::test]
    async fn second_run_fails_fast_without_invoking_handler() {
        let mut scope = AppendScope::new();
        scope
            .run(|_| async { Ok::<_, TestError>(Version::new(1)) })
            .await
            .unwrap();

        let mut invoked = false;
        let result = scope
            .run(|_| {
                invoked = true;
                async { Ok::<_, TestError>(Version::new(2)) }
            })
            .await;

        assert_eq!(result, Err(TestError::Reused(ScopeReused)));
        assert!(!invoked);
        assert_eq!(scope.next(), Some(Version::new(1)));
    }

    #[tokio::test]
    async fn failed_handler_leaves_next_unset_and_scope_spent() {
        let mut scope = AppendScope::new();
        let result = scope.run(|_| async { Err::<Version, _>(TestError::Down) }).await;

        assert_eq!(result, Err(TestError::Down));
        assert_eq!(scope.next(), None);
        assert!(scope.is_used());
    }

    #[test]
    fn scopes_are_independent_values() {
        let first = AppendScope::new().expecting(Version::new(1));
        let second = AppendScope::new();
        assert_eq!(first.expected(), Some(Version::new(1)));
        assert_eq!(second.expected(), None);
    }

    #[test]
    fn metadata_comes_from_provider() {
        let correlation = Uuid::new_v4();
        let scope =
            AppendScope::new().with_metadata(RequestMetadata::new(Some(correlation), None));
        assert_eq!(scope.event_metadata().correlation_id, Some(correlation));
    }
}
