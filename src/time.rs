//! Interval normalization and overlap testing.
//!
//! Every bound is reduced to UTC milliseconds before comparison. Intervals
//! are half-open, so `[a, b)` and `[b, c)` do not overlap.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::limits::MAX_DST_ADVANCE_MINUTES;
use crate::model::{Ms, Span};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A time bound in any of the shapes callers hand us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeInput {
    EpochMs(i64),
    Text(String),
    Instant(DateTime<Utc>),
}

impl From<i64> for TimeInput {
    fn from(ms: i64) -> Self {
        TimeInput::EpochMs(ms)
    }
}

impl From<&str> for TimeInput {
    fn from(s: &str) -> Self {
        TimeInput::Text(s.to_string())
    }
}

impl From<String> for TimeInput {
    fn from(s: String) -> Self {
        TimeInput::Text(s)
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeInput::Instant(dt)
    }
}

impl TimeInput {
    /// UTC milliseconds, or `None` when the value cannot be parsed.
    /// Offset-less text is read as UTC.
    pub fn to_ms(&self) -> Option<Ms> {
        match self {
            TimeInput::EpochMs(ms) => Some(*ms),
            TimeInput::Instant(dt) => Some(dt.timestamp_millis()),
            TimeInput::Text(raw) => parse_text(raw.trim()),
        }
    }
}

fn parse_text(raw: &str) -> Option<Ms> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// An interval whose bounds have not been normalized yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TimeInput,
    pub end: TimeInput,
}

impl TimeWindow {
    pub fn new(start: impl Into<TimeInput>, end: impl Into<TimeInput>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Normalized span, or `None` if either bound is unparsable or the
    /// interval is inverted.
    pub fn to_span(&self) -> Option<Span> {
        let start = self.start.to_ms()?;
        let end = self.end.to_ms()?;
        (start <= end).then(|| Span::new(start, end))
    }
}

/// Half-open overlap test.
///
/// Returns `false` for malformed intervals. That is not the same as "free":
/// anything safety-critical must validate its inputs before calling this.
pub fn windows_overlap(a: &TimeWindow, b: &TimeWindow) -> bool {
    match (a.to_span(), b.to_span()) {
        (Some(first), Some(second)) => first.overlaps(&second),
        _ => false,
    }
}

/// Resolve a venue-local wall-clock time to an instant.
///
/// Times inside a spring-forward gap are advanced minute by minute until a
/// real instant is found; ambiguous fall-back times take the earlier instant.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    (0..=MAX_DST_ADVANCE_MINUTES).find_map(|step| {
        tz.from_local_datetime(&(naive + Duration::minutes(step)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

pub fn local_to_ms(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<Ms> {
    local_to_utc(date, time, tz).map(|dt| dt.timestamp_millis())
}

/// Venue-local wall clock for an instant.
pub fn ms_to_local(ms: Ms, tz: Tz) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&tz).naive_local())
}
