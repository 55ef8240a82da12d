//! Timestamps: the sole correctness anchor for merging replies.
//!
//! A [`Timestamp`] pairs an NTP-style 64-bit fixed-point time with the id of
//! the clock that produced it, giving a total order across a deployment. The
//! system-wide assumption (not verified here) is that every write to a given
//! path gets a unique `(time, id)` pair.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
const UNIX_TO_NTP_OFFSET: u64 = 2_208_988_800;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A totally ordered point in time: NTP 32.32 fixed point plus a clock id.
///
/// Ordering is by `time` first, then lexicographically by `id` (derived from
/// field order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// NTP 64-bit time: seconds since 1900 in the high 32 bits, fraction of a
    /// second in the low 32 bits.
    pub time: u64,
    /// Id of the clock that produced this timestamp.
    pub id: [u8; 16],
}

impl Timestamp {
    /// Creates a timestamp from raw parts.
    #[must_use]
    pub const fn new(time: u64, id: [u8; 16]) -> Self {
        Self { time, id }
    }

    /// Reads the wall clock and stamps it with `id`.
    ///
    /// Best-effort: two calls within the clock's resolution can collide. Use
    /// a [`Clock`] where strict monotonicity per clock id is required.
    #[must_use]
    pub fn now(id: [u8; 16]) -> Self {
        Self {
            time: ntp_from_utc(Utc::now()),
            id,
        }
    }

    /// The timestamp as a UTC instant, truncated to nanoseconds.
    ///
    /// Returns `None` when the NTP seconds fall outside chrono's range.
    #[must_use]
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        let secs = (self.time >> 32).checked_sub(UNIX_TO_NTP_OFFSET)?;
        let frac = self.time & 0xffff_ffff;
        let nanos = (frac * NANOS_PER_SEC) >> 32;
        Utc.timestamp_opt(i64::try_from(secs).ok()?, u32::try_from(nanos).ok()?)
            .single()
    }
}

fn ntp_from_utc(at: DateTime<Utc>) -> u64 {
    // Saturate below the Unix epoch rather than wrap; pre-1970 wall clocks
    // are a configuration error, not a supported input.
    let secs = u64::try_from(at.timestamp()).unwrap_or(0) + UNIX_TO_NTP_OFFSET;
    let frac = (u64::from(at.timestamp_subsec_nanos()) << 32) / NANOS_PER_SEC;
    (secs << 32) | (frac & 0xffff_ffff)
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Some(at) => write!(f, "{}", at.to_rfc3339())?,
            None => write!(f, "{:#018x}", self.time)?,
        }
        write!(f, "/{}", Uuid::from_bytes(self.id).simple())
    }
}

/// A clock handing out strictly increasing timestamps for one clock id.
///
/// If the wall clock has not advanced past the previously issued timestamp,
/// the new one is bumped by one fixed-point ulp instead of repeating.
#[derive(Debug)]
pub struct Clock {
    id: [u8; 16],
    last: Mutex<u64>,
}

impl Clock {
    /// Creates a clock with the given id.
    #[must_use]
    pub fn new(id: [u8; 16]) -> Self {
        Self {
            id,
            last: Mutex::new(0),
        }
    }

    /// Creates a clock with a fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().into_bytes())
    }

    /// This clock's id.
    #[must_use]
    pub const fn id(&self) -> [u8; 16] {
        self.id
    }

    /// Issues the next timestamp, strictly greater than any issued before.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let wall = ntp_from_utc(Utc::now());
        let mut last = self.last.lock().expect("clock lock poisoned");
        let time = if wall > *last { wall } else { *last + 1 };
        *last = time;
        Timestamp { time, id: self.id }
    }
}
