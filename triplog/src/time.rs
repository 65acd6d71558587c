//! Epoch-millisecond timestamps used for every instant inside the engine.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, TripError};

/// Milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochMs(pub u64);

impl EpochMs {
    pub const ZERO: EpochMs = EpochMs(0);

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(self, earlier: EpochMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn seconds_since(self, earlier: EpochMs) -> f64 {
        self.since(earlier) as f64 / 1000.0
    }

    pub fn plus_millis(self, ms: u64) -> EpochMs {
        EpochMs(self.0.saturating_add(ms))
    }

    pub fn minus_millis(self, ms: u64) -> EpochMs {
        EpochMs(self.0.saturating_sub(ms))
    }

    pub fn to_utc(self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Result<EpochMs> {
        let ms = dt.timestamp_millis();
        u64::try_from(ms)
            .map(EpochMs)
            .map_err(|_| TripError::InvalidTimestamp(format!("{ms} ms precedes the epoch")))
    }

    /// Parse an RFC 3339 / ISO-8601 instant such as `2025-01-15T10:00:00Z`.
    pub fn parse_rfc3339(text: &str) -> Result<EpochMs> {
        let dt = DateTime::parse_from_rfc3339(text.trim())
            .map_err(|e| TripError::InvalidTimestamp(format!("{text:?}: {e}")))?;
        EpochMs::from_datetime(&dt)
    }

    /// Like [`EpochMs::parse_rfc3339`], but also accepts ISO-8601 local
    /// date-times without an offset, which are read as UTC.
    pub fn parse_iso8601(text: &str) -> Result<EpochMs> {
        if let Ok(ms) = EpochMs::parse_rfc3339(text) {
            return Ok(ms);
        }
        let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| TripError::InvalidTimestamp(format!("{text:?}: {e}")))?;
        EpochMs::from_datetime(&naive.and_utc())
    }
}

impl From<u64> for EpochMs {
    fn from(value: u64) -> Self {
        EpochMs(value)
    }
}

impl fmt::Display for EpochMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let utc = EpochMs::parse_rfc3339("2025-01-15T10:00:00Z").unwrap();
        let offset = EpochMs::parse_rfc3339("2025-01-15T05:00:00-05:00").unwrap();
        assert_eq!(utc, offset);
        assert_eq!(utc.as_millis(), 1_736_935_200_000);
    }

    #[test]
    fn rejects_pre_epoch_and_garbage() {
        assert!(EpochMs::parse_rfc3339("1969-12-31T23:59:59Z").is_err());
        assert!(EpochMs::parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn iso8601_without_offset_is_utc() {
        let a = EpochMs::parse_iso8601("2025-01-15T10:00:00.250").unwrap();
        let b = EpochMs::parse_iso8601("2025-01-15T10:00:00.250Z").unwrap();
        assert_eq!(a, b);
        assert!(EpochMs::parse_iso8601("2025-01-15").is_err());
    }

    #[test]
    fn elapsed_saturates() {
        let a = EpochMs(5_000);
        let b = EpochMs(8_500);
        assert_eq!(b.since(a), 3_500);
        assert_eq!(a.since(b), 0);
        assert!((b.seconds_since(a) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn displays_as_utc_instant() {
        assert_eq!(EpochMs(0).to_string(), "1970-01-01T00:00:00.000Z");
    }
}
