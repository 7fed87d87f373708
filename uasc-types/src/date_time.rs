// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains the implementation of `DateTime`, the OPC UA timestamp.

use std::{
    fmt,
    io::{Read, Write},
};

use chrono::{TimeZone, Utc};

use crate::encoding::{
    read_i64, write_i64, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
    SimpleBinaryEncodable,
};

/// Ticks are 100 nanosecond intervals.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch (1970-01-01).
const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

/// An OPC UA timestamp: the number of 100 nanosecond intervals since 1601-01-01 00:00:00 UTC,
/// ignoring leap seconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    ticks: i64,
}

impl Default for DateTime {
    fn default() -> Self {
        DateTime::null()
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_chrono().to_rfc3339())
    }
}

impl SimpleBinaryEncodable for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_i64(stream, self.ticks)
    }
}

impl SimpleBinaryDecodable for DateTime {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let ticks = read_i64(stream)?;
        Ok(DateTime::from_ticks(ticks))
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        let seconds = value.timestamp() + EPOCH_DELTA_SECONDS;
        if seconds < 0 {
            return DateTime::null();
        }
        let ticks = seconds
            .saturating_mul(TICKS_PER_SECOND)
            .saturating_add((value.timestamp_subsec_nanos() / 100) as i64);
        DateTime { ticks }
    }
}

impl DateTime {
    /// The current time as an OPC UA timestamp.
    pub fn now() -> DateTime {
        Utc::now().into()
    }

    /// The null timestamp, the epoch itself.
    pub fn null() -> DateTime {
        DateTime { ticks: 0 }
    }

    /// Construct from a raw tick count. Negative ticks clamp to the epoch.
    pub fn from_ticks(ticks: i64) -> DateTime {
        DateTime {
            ticks: ticks.max(0),
        }
    }

    /// The raw tick count.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Convert to a chrono timestamp. Tick counts beyond the chrono range saturate.
    pub fn as_chrono(&self) -> chrono::DateTime<Utc> {
        let seconds = self.ticks / TICKS_PER_SECOND - EPOCH_DELTA_SECONDS;
        let nanos = (self.ticks % TICKS_PER_SECOND) * 100;
        Utc.timestamp_opt(seconds, nanos as u32)
            .single()
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
    }

    /// Milliseconds elapsed between this timestamp and `other`, negative when `other` is earlier.
    pub fn elapsed_millis(&self, other: &DateTime) -> i64 {
        (other.ticks - self.ticks) / (TICKS_PER_SECOND / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_epoch() {
        let epoch = Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(DateTime::from(epoch).ticks(), 0);
    }

    #[test]
    fn datetime_chrono_round_trip() {
        let now = DateTime::now();
        let via_chrono = DateTime::from(now.as_chrono());
        assert_eq!(now, via_chrono);
    }

    #[test]
    fn datetime_ordering() {
        let a = DateTime::from_ticks(1000);
        let b = DateTime::from_ticks(2000);
        assert!(a < b);
        assert_eq!(a.elapsed_millis(&b), 0);
        let c = DateTime::from_ticks(1000 + 50 * 10_000);
        assert_eq!(a.elapsed_millis(&c), 50);
    }
}
