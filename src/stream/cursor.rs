// Cursor resolution: (resolution, last seen timestamp) -> query plan.
// Pure; the store turns a plan into SQL (history_repo::aggregation).

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::models::Sample;

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Raw rows shown on a fresh `none` stream. Coarser resolutions scale this so every
/// initial window spans a comparable number of rows on screen.
const BASE_LIMIT: u32 = 100;
const MINUTE_LIMIT: u32 = 200;

/// Aggregation granularity of a stream. Closed set: nothing outside these variants
/// ever reaches query construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    #[default]
    None,
    Minute,
    Hour,
    Day,
    Month,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::None,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Month,
    ];

    /// Strict parse of the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Resolution::None),
            "minute" => Some(Resolution::Minute),
            "hour" => Some(Resolution::Hour),
            "day" => Some(Resolution::Day),
            "month" => Some(Resolution::Month),
            _ => None,
        }
    }

    /// Lenient parse of the `group` query parameter: absent or empty is raw,
    /// anything unrecognised falls back to minute buckets.
    pub fn from_param(group: Option<&str>) -> Self {
        match group.map(str::trim) {
            None | Some("") => Resolution::None,
            Some(s) => Self::parse(s).unwrap_or(Resolution::Minute),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::None => "none",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
            Resolution::Month => "month",
        }
    }

    pub fn is_raw(self) -> bool {
        self == Resolution::None
    }

    /// Number of raw rows read by an initial batch.
    pub fn limit(self) -> u32 {
        match self {
            Resolution::None => BASE_LIMIT,
            Resolution::Minute => MINUTE_LIMIT,
            Resolution::Hour => MINUTE_LIMIT * 60,
            Resolution::Day => MINUTE_LIMIT * 60 * 24,
            Resolution::Month => MINUTE_LIMIT * 60 * 24 * 30,
        }
    }

    /// Floor of `ts_ms` to this resolution's bucket start, in UTC.
    ///
    /// Queries bucket in SQL (`history_repo::aggregation::bucket_expr`); this is the
    /// in-process reference those fragments are checked against, not a second code path.
    pub fn truncate(self, ts_ms: i64) -> i64 {
        match self {
            Resolution::None => ts_ms,
            Resolution::Minute => ts_ms.div_euclid(MS_PER_MINUTE) * MS_PER_MINUTE,
            Resolution::Hour => ts_ms.div_euclid(MS_PER_HOUR) * MS_PER_HOUR,
            Resolution::Day => ts_ms.div_euclid(MS_PER_DAY) * MS_PER_DAY,
            Resolution::Month => DateTime::<Utc>::from_timestamp_millis(ts_ms)
                .and_then(|dt| {
                    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
                        .single()
                })
                .map(|start| start.timestamp_millis())
                .unwrap_or(ts_ms),
        }
    }
}

/// Exclusive lower bound of what one connection has already received.
/// Starts unset; only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor(Option<i64>);

impl Cursor {
    pub fn unset() -> Self {
        Cursor(None)
    }

    pub fn at(ts_ms: i64) -> Self {
        Cursor(Some(ts_ms))
    }

    pub fn last_seen(self) -> Option<i64> {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self.0.is_none()
    }

    /// Moves to the newest timestamp in `batch`, never backwards. Empty batches are a no-op.
    pub fn advance(&mut self, batch: &[Sample]) {
        let Some(newest) = batch.iter().map(|s| s.timestamp).max() else {
            return;
        };
        self.0 = Some(self.0.map_or(newest, |cur| cur.max(newest)));
    }
}

/// What one poll of a metrics stream reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPlan {
    /// Newest `limit` raw rows (grouped when the resolution is not raw), emitted ascending.
    Initial { resolution: Resolution, limit: u32 },
    /// Every row (or bucket) strictly newer than `after`, ascending, unbounded.
    Incremental { resolution: Resolution, after: i64 },
}

impl QueryPlan {
    pub fn resolution(&self) -> Resolution {
        match *self {
            QueryPlan::Initial { resolution, .. } | QueryPlan::Incremental { resolution, .. } => {
                resolution
            }
        }
    }
}

pub fn resolve(resolution: Resolution, cursor: Cursor) -> QueryPlan {
    match cursor.last_seen() {
        None => QueryPlan::Initial {
            resolution,
            limit: resolution.limit(),
        },
        Some(after) => QueryPlan::Incremental { resolution, after },
    }
}
