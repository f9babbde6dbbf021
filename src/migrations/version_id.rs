//! Migration version identifiers.
//!
//! A version is the canonical 14-digit UTC timestamp `YYYYMMDDHHMMSS`, or
//! the `"0"` sentinel meaning "nothing applied". Because every real version
//! has the same width, numeric order and string order agree; identifiers of
//! any other width are rejected at parse time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::errors::{MigrationError, MigrationResult};

const WIDTH: usize = 14;

/// A validated migration version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionId(u64);

impl VersionId {
    /// The "nothing applied" sentinel.
    pub const ZERO: VersionId = VersionId(0);

    /// Parse a version string.
    pub fn parse(input: &str) -> MigrationResult<Self> {
        let trimmed = input.trim();
        if trimmed == "0" {
            return Ok(Self::ZERO);
        }

        if trimmed.len() != WIDTH || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MigrationError::InvalidVersion(input.to_string()));
        }

        match trimmed.parse::<u64>() {
            Ok(0) | Err(_) => Err(MigrationError::InvalidVersion(input.to_string())),
            Ok(value) => Ok(Self(value)),
        }
    }

    /// Version for the given instant.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        // Fourteen formatted digits always fit in a u64.
        let digits = at.format("%Y%m%d%H%M%S").to_string();
        Self(digits.parse().unwrap_or_default())
    }

    /// Version for the current UTC time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Numeric value of the identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Render as `YYYY-MM-DD HH:MM:SS`; the sentinel renders as `0`.
    pub fn formatted(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let s = self.to_string();
        format!(
            "{}-{}-{} {}:{}:{}",
            &s[0..4],
            &s[4..6],
            &s[6..8],
            &s[8..10],
            &s[10..12],
            &s[12..14]
        )
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "0")
        } else {
            write!(f, "{:014}", self.0)
        }
    }
}

impl FromStr for VersionId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
