//! Date/time wire mapping
//!
//! Instants travel as an unsigned count of 100ns ticks since
//! 1970-01-01T00:00:00 UTC.

use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Ticks per second
pub const TICKS_PER_SECOND: u64 = 10_000_000;

const NANOS_PER_TICK: u64 = 100;

/// Convert an instant to ticks. Instants before 1970 are rejected.
pub fn to_ticks(instant: &DateTime<Utc>) -> Result<u64> {
    let secs = u64::try_from(instant.timestamp()).map_err(|_| Error::InvalidDateTime)?;
    let sub = u64::from(instant.timestamp_subsec_nanos()) / NANOS_PER_TICK;
    secs.checked_mul(TICKS_PER_SECOND)
        .and_then(|ticks| ticks.checked_add(sub))
        .ok_or(Error::InvalidDateTime)
}

/// Convert ticks back to an instant
pub fn from_ticks(ticks: u64) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(ticks / TICKS_PER_SECOND).map_err(|_| Error::InvalidDateTime)?;
    let nanos = ((ticks % TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or(Error::InvalidDateTime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_is_zero() {
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_ticks(&epoch).unwrap(), 0);
        assert_eq!(from_ticks(0).unwrap(), epoch);
    }

    #[test]
    fn test_tick_resolution() {
        let instant = Utc.timestamp_opt(1, 123_456_789).unwrap();
        let ticks = to_ticks(&instant).unwrap();
        assert_eq!(ticks, TICKS_PER_SECOND + 1_234_567);
        assert_eq!(
            from_ticks(ticks).unwrap(),
            Utc.timestamp_opt(1, 123_456_700).unwrap()
        );
    }

    #[test]
    fn test_before_epoch_rejected() {
        let instant = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(to_ticks(&instant), Err(Error::InvalidDateTime));
    }
}
