//! Optimistic concurrency conflicts.
//!
//! Writers never lock a stream. Each append carries the version the writer
//! started from, and the store rejects the append if another writer got
//! there first. The loser receives a [`ConcurrencyConflict`] and must re-read
//! the aggregate and re-run its business operation; nothing in this crate
//! retries a conflict on its behalf.

use thiserror::Error;

use crate::version::Version;

/// Error indicating a concurrency conflict during append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", format_conflict(.expected.as_ref().copied(), .actual.as_ref().copied()))]
pub struct ConcurrencyConflict {
    /// The version the writer started from.
    /// `None` indicates it expected no stream to exist.
    pub expected: Option<Version>,
    /// The version currently stored.
    /// `None` indicates the stream does not exist.
    pub actual: Option<Version>,
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(expected: Option<Version>, actual: Option<Version>) -> String {
    match (expected, actual) {
        (None, Some(actual)) => {
            format!(
                "concurrency conflict: expected new stream, found version {actual} (hint: \
                 another process created this aggregate; reload and retry)"
            )
        }
        (Some(expected), Some(actual)) => {
            format!(
                "concurrency conflict: expected version {expected}, found {actual} (hint: \
                 stream was modified; reload and retry)"
            )
        }
        (Some(expected), None) => {
            format!("concurrency conflict: expected version {expected}, found no stream")
        }
        (None, None) => "concurrency conflict: unexpected empty state".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_expected_new_stream_mentions_hint() {
        let conflict = ConcurrencyConflict {
            expected: None,
            actual: Some(Version::new(42)),
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected new stream"));
        assert!(msg.contains("reload and retry"));
    }

    #[test]
    fn conflict_expected_version_includes_versions() {
        let conflict = ConcurrencyConflict {
            expected: Some(Version::new(5)),
            actual: Some(Version::new(10)),
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected version 5"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn conflict_against_missing_stream_formats() {
        let conflict = ConcurrencyConflict {
            expected: Some(Version::new(2)),
            actual: None,
        };
        assert!(conflict.to_string().contains("found no stream"));
    }

    #[test]
    fn conflict_unexpected_empty_state_formats() {
        let conflict = ConcurrencyConflict {
            expected: None,
            actual: None,
        };
        assert!(conflict.to_string().contains("unexpected empty state"));
    }
}
