// src/release/timestamp.rs

//! Release timestamps
//!
//! Release directories are named after the UTC time of the push, formatted
//! as `YYYYMMDDHHMMSS`. The format is fixed-width and most-significant-unit
//! first, so comparing the strings compares the instants. `latest` lookups
//! depend on that, which is why the format only ever comes from this type.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// strftime format of a release timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Width of a release timestamp
pub const TIMESTAMP_LEN: usize = 14;

/// A validated `YYYYMMDDHHMMSS` release timestamp
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseTimestamp(String);

impl ReleaseTimestamp {
    /// Timestamp for the current UTC time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Parse and validate a timestamp string
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != TIMESTAMP_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidTimestamp(format!(
                "'{}' is not a {}-digit YYYYMMDDHHMMSS value",
                s, TIMESTAMP_LEN
            )));
        }

        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|e| Error::InvalidTimestamp(format!("'{}': {}", s, e)))?;

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Current UTC time, or the second after `last` if the clock has not
    /// moved past it yet
    ///
    /// Keeps generated release timestamps strictly increasing when pushes
    /// land within the same second.
    pub fn now_after(last: Option<&ReleaseTimestamp>) -> Result<Self> {
        let now = Self::now();
        match last {
            Some(last) if *last >= now => last.successor(),
            _ => Ok(now),
        }
    }

    /// The timestamp one second later
    pub fn successor(&self) -> Result<Self> {
        let dt = NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT)
            .map_err(|e| Error::InvalidTimestamp(format!("'{}': {}", self.0, e)))?;
        let next = dt
            .checked_add_signed(TimeDelta::seconds(1))
            .ok_or_else(|| Error::InvalidTimestamp(format!("'{}' has no successor", self.0)))?;
        // Re-validated so the width stays fixed past year 9999
        Self::parse(&next.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl fmt::Display for ReleaseTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReleaseTimestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReleaseTimestamp {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ReleaseTimestamp> for String {
    fn from(ts: ReleaseTimestamp) -> Self {
        ts.0
    }
}
