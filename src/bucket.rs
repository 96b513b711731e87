use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

// ─── Wall clock ──────────────────────────────────────────────────

/// Current UTC time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether `ms` falls inside the calendar range months can be derived
/// from. Instants outside it have no month key.
pub fn is_calendar_instant(ms: i64) -> bool {
    DateTime::<Utc>::from_timestamp_millis(ms).is_some()
}

// ─── Calendar month shard key ────────────────────────────────────

/// A UTC calendar month. Orders chronologically (year, then month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The month containing the instant `ms`.
    pub fn from_ms(ms: i64) -> Self {
        let dt = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// First millisecond of the month.
    pub fn start_ms(self) -> i64 {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0)
    }

    /// First millisecond of the following month (exclusive end).
    pub fn end_ms(self) -> i64 {
        self.next().start_ms()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ─── Fixed-width buckets ─────────────────────────────────────────

/// Maps instants onto fixed-width buckets. The width never changes
/// for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketClock {
    width_ms: i64,
}

impl BucketClock {
    pub const MINUTE_MS: i64 = 60_000;
    pub const HOUR_MS: i64 = 3_600_000;

    pub fn new(width_ms: i64) -> Self {
        Self {
            width_ms: width_ms.max(1),
        }
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// floor(t / width) × width
    pub fn bucket_start(&self, t: i64) -> i64 {
        t.div_euclid(self.width_ms) * self.width_ms
    }

    /// ceil(t / width) × width. An instant sitting exactly on a
    /// boundary is its own next boundary.
    pub fn next_boundary(&self, t: i64) -> i64 {
        let start = self.bucket_start(t);
        if start == t {
            t
        } else {
            start + self.width_ms
        }
    }

    pub fn month_key(&self, t: i64) -> MonthKey {
        MonthKey::from_ms(t)
    }

    /// Every month intersecting `[from, to]`, ascending. Empty when
    /// `from > to`.
    pub fn months_between(&self, from: i64, to: i64) -> Vec<MonthKey> {
        if from > to {
            return Vec::new();
        }
        let last = MonthKey::from_ms(to);
        let mut month = MonthKey::from_ms(from);
        let mut months = vec![month];
        while month < last {
            month = month.next();
            months.push(month);
        }
        months
    }

    /// Number of buckets a closed range `[from, to]` spans, or `None`
    /// when the span does not fit in an `i64`.
    pub fn buckets_in_range(&self, from: i64, to: i64) -> Option<i64> {
        let span = to.checked_sub(from)?;
        Some(span.div_euclid(self.width_ms) + 1)
    }
}
