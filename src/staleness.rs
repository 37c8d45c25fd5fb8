//! Staleness gate and load windows
//!
//! Timestamps read back from the warehouse carry no zone. When the data was
//! collected in a non-UTC zone the stored wall-clock value is local time, so
//! before comparing at a granularity the target date is shifted by the zone's
//! offset and both sides are floored to the same bucket.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

/// Format of the explicit `stream` window bounds.
pub const STREAM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Bucket size used to decide whether two timestamps are the same load period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    /// No staleness check; the caller supplies the load window.
    Stream,
}

impl Granularity {
    fn bucket(&self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day | Granularity::Stream => Duration::days(1),
        }
    }
}

impl FromStr for Granularity {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "stream" => Ok(Granularity::Stream),
            other => Err(LoaderError::Config(format!(
                "Unsupported granularity '{}', must be one of [hour day stream]",
                other
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Floors `t` to the start of its granularity bucket (UTC boundaries).
pub fn truncate(t: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    t.duration_trunc(granularity.bucket()).unwrap_or(t)
}

/// Offset of `tz` from UTC at the instant `at`.
pub fn zone_offset(tz: Tz, at: DateTime<Utc>) -> Duration {
    let seconds = tz
        .offset_from_utc_datetime(&at.naive_utc())
        .fix()
        .local_minus_utc();
    Duration::seconds(i64::from(seconds))
}

/// Reinterprets a zone-less warehouse timestamp, stored as UTC, as local time
/// in `tz`.
pub fn adjust_for_zone(target: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    target - zone_offset(tz, target)
}

/// Whether the warehouse already holds data for the input's period or later.
///
/// An absent target date (empty or missing table) is never stale, and the
/// `stream` granularity disables the check.
pub fn is_stale(
    input_date: DateTime<Utc>,
    target_date: Option<DateTime<Utc>>,
    granularity: Granularity,
    target_tz: Tz,
) -> bool {
    if granularity == Granularity::Stream {
        return false;
    }
    let Some(target_date) = target_date else {
        return false;
    };

    let target = truncate(adjust_for_zone(target_date, target_tz), granularity);
    target > truncate(input_date, granularity)
}

/// Half-open `[start, end)` window of rows replaced by a load, in the
/// warehouse's zone-less wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl LoadWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end <= start {
            return Err(LoaderError::Config(format!(
                "load window end {} must be after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses an explicit `stream` window.
    pub fn parse_stream(start: &str, end: &str) -> Result<Self> {
        let parse = |value: &str, flag: &str| {
            NaiveDateTime::parse_from_str(value, STREAM_TIME_FORMAT).map_err(|e| {
                LoaderError::Config(format!("issue parsing {} '{}': {}", flag, value, e))
            })
        };
        Self::new(parse(start, "stream start")?, parse(end, "stream end")?)
    }
}

/// Window of the snapshot's period, used to make same-period reloads
/// idempotent.
///
/// For `hour`/`day` this is the bucket containing the input date expressed as
/// `target_tz` wall-clock time. For `stream` it is the caller's window.
pub fn load_window(
    input_date: DateTime<Utc>,
    granularity: Granularity,
    target_tz: Tz,
    stream_window: Option<LoadWindow>,
) -> Result<LoadWindow> {
    if granularity == Granularity::Stream {
        return stream_window.ok_or_else(|| {
            LoaderError::Config(
                "stream granularity requires an explicit start and end time".to_string(),
            )
        });
    }

    let local = input_date + zone_offset(target_tz, input_date);
    let start = truncate(local, granularity);
    let end = start + granularity.bucket();
    LoadWindow::new(start.naive_utc(), end.naive_utc())
}
