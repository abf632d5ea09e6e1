//! Error taxonomy shared by every layer.
//!
//! Each error type in this crate keeps its own variants and source chain, and
//! reports which [`ErrorKind`] it belongs to so the HTTP boundary can pick a
//! status code without inspecting concrete types.

use std::fmt;

/// Category of a failure, preserved from the store up to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed stream does not exist.
    NotFound,
    /// A stream already exists for the identifier being created.
    AlreadyExists,
    /// The expected version did not match the stored version.
    ConcurrencyConflict,
    /// The aggregate rejected the requested state transition.
    DomainRuleViolation,
    /// Connectivity failure that outlasted the retry budget.
    Transient,
    /// Every attempt ran past its deadline.
    Timeout,
    /// Missing or malformed concurrency token at the HTTP boundary.
    InvalidPrecondition,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Codec, storage or programming fault.
    Internal,
}

impl ErrorKind {
    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::ConcurrencyConflict => "concurrency conflict",
            Self::DomainRuleViolation => "domain rule violation",
            Self::Transient => "transient failure",
            Self::Timeout => "timeout",
            Self::InvalidPrecondition => "invalid precondition",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}
