//! Bi-temporal time handling for graph facts.
//!
//! Relationships carry a validity interval `[valid_at, invalid_at)`:
//!
//! | Field | Question Answered | Example |
//! |-------|-------------------|---------|
//! | `valid_at` | Since when is this fact true? | "Alice works at Acme since 2021" |
//! | `invalid_at` | Until when was it true? | "...until 2024-03-01" |
//! | `created_at` | When did the system learn it? | "Recorded on 2024-01-15" |
//!
//! Open ends are expressed with two sentinels instead of `Option`, so that an
//! interval is always comparable:
//!
//! - [`ALWAYS_VALID_FROM`]: the minimum representable instant
//! - [`STILL_VALID`]: the maximum representable instant
//!
//! A fact is *current* exactly when its `invalid_at` equals [`STILL_VALID`].
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use gromozeka_memory::models::temporal::{ValidityInterval, STILL_VALID};
//!
//! let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let interval = ValidityInterval::new(since, STILL_VALID).unwrap();
//!
//! assert!(interval.is_current());
//! assert!(interval.contains(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
//! assert!(!interval.contains(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()));
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Start sentinel: valid since the beginning of time.
pub const ALWAYS_VALID_FROM: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// End sentinel: not invalidated yet.
pub const STILL_VALID: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

/// Half-open validity interval `[valid_at, invalid_at)`.
///
/// Construction enforces `valid_at <= invalid_at` unless `invalid_at` is the
/// [`STILL_VALID`] sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityInterval {
    valid_at: DateTime<Utc>,
    invalid_at: DateTime<Utc>,
}

impl ValidityInterval {
    /// Creates a validated interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `valid_at` is after a non-sentinel
    /// `invalid_at`.
    pub fn new(valid_at: DateTime<Utc>, invalid_at: DateTime<Utc>) -> Result<Self> {
        if invalid_at != STILL_VALID && valid_at > invalid_at {
            return Err(Error::InvalidInput(format!(
                "valid_at {valid_at} is after invalid_at {invalid_at}"
            )));
        }
        Ok(Self {
            valid_at,
            invalid_at,
        })
    }

    /// An interval that has always been and is still valid.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            valid_at: ALWAYS_VALID_FROM,
            invalid_at: STILL_VALID,
        }
    }

    /// An open interval starting at `valid_at`.
    #[must_use]
    pub const fn since(valid_at: DateTime<Utc>) -> Self {
        Self {
            valid_at,
            invalid_at: STILL_VALID,
        }
    }

    /// Start of validity (inclusive).
    #[must_use]
    pub const fn valid_at(&self) -> DateTime<Utc> {
        self.valid_at
    }

    /// End of validity (exclusive), or [`STILL_VALID`].
    #[must_use]
    pub const fn invalid_at(&self) -> DateTime<Utc> {
        self.invalid_at
    }

    /// Whether the interval is still open.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.invalid_at == STILL_VALID
    }

    /// Checks whether `at` falls inside `[valid_at, invalid_at)`.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_at <= at && (self.is_current() || at < self.invalid_at)
    }

    /// Closes the interval at `at`, clamped so it never ends before it starts.
    #[must_use]
    pub fn closed_at(self, at: DateTime<Utc>) -> Self {
        Self {
            valid_at: self.valid_at,
            invalid_at: at.max(self.valid_at),
        }
    }
}

impl Default for ValidityInterval {
    fn default() -> Self {
        Self::always()
    }
}

/// Which slice of history a relationship query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalFilter {
    /// Only facts that are still valid.
    #[default]
    Current,
    /// Facts that were valid at the given instant.
    AsOf(DateTime<Utc>),
    /// Every fact ever recorded, including invalidated ones.
    All,
}

impl TemporalFilter {
    /// Checks whether an interval passes this filter.
    #[must_use]
    pub fn admits(&self, interval: &ValidityInterval) -> bool {
        match self {
            Self::Current => interval.is_current(),
            Self::AsOf(at) => interval.contains(*at),
            Self::All => true,
        }
    }
}
