use std::fmt;

use chrono::{DateTime, DurationRound, NaiveDateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::QueryError;

/// Resolution of KQL `datetime` values, in nanoseconds.
const TICK_NANOS: i64 = 100;

/// Closed-open time window `[start, end)` a query is bounded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        if start > end {
            return Err(QueryError::InvalidRange {
                start: format_timestamp(&start),
                end: format_timestamp(&end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }

    /// Splits at the midpoint, rounded down to a whole tick since query
    /// datetimes resolve no finer. Returns `None` once no tick boundary lies
    /// strictly inside the range.
    pub fn split(&self) -> Option<(TimeRange, TimeRange)> {
        let middle = self
            .midpoint()
            .duration_trunc(TimeDelta::nanoseconds(TICK_NANOS))
            .ok()?;
        if middle <= self.start || middle >= self.end {
            return None;
        }
        Some((
            TimeRange {
                start: self.start,
                end: middle,
            },
            TimeRange {
                start: middle,
                end: self.end,
            },
        ))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// Renders a timestamp the way the query language expects it inside
/// `datetime(...)`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]` / `YYYY-MM-DD HH:MM:SS[.f]`
/// which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!(
        "invalid timestamp '{raw}' (expected RFC 3339 or YYYY-MM-DDTHH:MM:SS)"
    ))
}
