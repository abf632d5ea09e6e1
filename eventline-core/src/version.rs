//! Stream version tokens.
//!
//! A [`Version`] counts the events in one stream: a stream holding exactly
//! `N` events is at version `N`, and a stream that does not exist yet is at
//! [`Version::INITIAL`]. The value doubles as the optimistic-concurrency token
//! handed to HTTP callers as an entity tag.

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};

/// Number of events a stream holds; the optimistic-concurrency token.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a stream with no events.
    pub const INITIAL: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// The version reached after appending `count` more events.
    ///
    /// Saturates at `u64::MAX`.
    #[must_use]
    pub const fn advanced_by(self, count: usize) -> Self {
        Self(self.0.saturating_add(count as u64))
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Version {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}
