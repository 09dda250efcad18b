//! Statistics sink interface and the shared insertion routine
//!
//! The host platform owns long-term storage; this crate only talks to it
//! through the [`StatisticsSink`] trait. Both orchestrators funnel fetched
//! records through [`insert_usage_statistics`], which normalizes ordering,
//! deduplicates overlapping fetch windows, localizes the portal's naive
//! timestamps, and attaches the running cumulative sum the consumption chart
//! needs.
//!
//! [`MemorySink`] is an in-process reference implementation used by the CLI
//! runner and the test suite.

use crate::error::Result;
use crate::types::{QueriedPoint, Resolution, StatisticPoint, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Abstract append/query interface onto the host's time-series store.
///
/// One series per account holds all three resolutions; each appended point
/// carries the period value and the cumulative sum.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    /// Append points to a series. Re-appending an existing timestamp
    /// overwrites it (last-write-wins).
    async fn append(&self, series_key: &str, points: Vec<StatisticPoint>) -> Result<()>;

    /// Query period values in `[start, end)`; `end = None` means "now".
    /// `granularity` is a hint for hosts that re-bucket stored data.
    async fn query_range(
        &self,
        series_key: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        granularity: Resolution,
    ) -> Result<Vec<QueriedPoint>>;

    /// Most recent point in a series, if any
    async fn last_point(&self, series_key: &str) -> Result<Option<QueriedPoint>>;
}

/// Truncate a source-local timestamp to its resolution's period start
fn truncate_to_period(timestamp: NaiveDateTime, resolution: Resolution) -> NaiveDateTime {
    match resolution {
        Resolution::Hourly => timestamp,
        Resolution::Daily => NaiveDateTime::new(timestamp.date(), NaiveTime::MIN),
        Resolution::Monthly => {
            let month_start = timestamp.date().with_day(1).unwrap_or(timestamp.date());
            NaiveDateTime::new(month_start, NaiveTime::MIN)
        }
    }
}

/// Localize a naive source-local timestamp to a UTC instant.
///
/// Canonical policy: portal timestamps are always source-local. Ambiguous
/// local times (DST fall-back) take the earliest mapping; nonexistent local
/// times (spring-forward gap) yield `None` and the point is dropped.
fn localize_to_utc(timestamp: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&timestamp) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Build sink points for one resolution group.
///
/// Sorts ascending, deduplicates by exact timestamp (last-write-wins, which
/// absorbs overlap between backfill and incremental windows), truncates to
/// period start, localizes to UTC, and accumulates the running sum across
/// the deduplicated sequence.
pub fn build_statistic_points(
    records: &[UsageRecord],
    resolution: Resolution,
    tz: Tz,
) -> Vec<StatisticPoint> {
    let mut sorted: Vec<&UsageRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    // BTreeMap keyed by timestamp: later duplicates overwrite earlier ones
    // while keeping ascending order for the cumulative pass.
    let mut deduped: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
    for record in sorted {
        deduped.insert(record.timestamp, record.usage);
    }
    debug!(
        "After deduplication: {} {} points (from {})",
        deduped.len(),
        resolution,
        records.len()
    );

    let mut points = Vec::with_capacity(deduped.len());
    let mut cumulative_sum = 0.0;
    for (timestamp, usage) in deduped {
        let period_start = truncate_to_period(timestamp, resolution);
        let Some(start) = localize_to_utc(period_start, tz) else {
            debug!(
                "Dropping {} point at nonexistent local time {}",
                resolution, period_start
            );
            continue;
        };

        cumulative_sum += usage;
        points.push(StatisticPoint {
            start,
            state: usage,
            sum: cumulative_sum,
        });
    }
    points
}

/// Insert usage records into the statistics sink.
///
/// Groups by resolution and appends each group separately. Never raises:
/// sink unavailability is logged as a warning and the records are simply
/// not persisted this cycle — they are re-derivable on the next pass since
/// fetches are driven by timestamp gaps, not assumed delivery.
pub async fn insert_usage_statistics(
    sink: &dyn StatisticsSink,
    series_key: &str,
    tz: Tz,
    records: &[UsageRecord],
) {
    if records.is_empty() {
        debug!("No usage data to insert");
        return;
    }
    debug!("Processing {} data points for statistics insertion", records.len());

    for resolution in [Resolution::Hourly, Resolution::Daily, Resolution::Monthly] {
        let group: Vec<UsageRecord> = records
            .iter()
            .filter(|r| r.resolution == resolution)
            .cloned()
            .collect();
        if group.is_empty() {
            continue;
        }

        let points = build_statistic_points(&group, resolution, tz);
        debug!("Adding {} {} statistics to sink", points.len(), resolution);
        if let Err(err) = sink.append(series_key, points).await {
            warn!("Failed to insert {} statistics: {}", resolution, err);
        }
    }
}

/// In-memory statistics sink.
///
/// Reference implementation for the CLI runner and tests. Stores points at
/// their inserted period starts; `query_range` returns raw stored points and
/// leaves granularity re-bucketing to real hosts.
#[derive(Default)]
pub struct MemorySink {
    series: tokio::sync::Mutex<HashMap<String, BTreeMap<DateTime<Utc>, (f64, f64)>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored points for a series in ascending order, for inspection
    pub async fn points(&self, series_key: &str) -> Vec<StatisticPoint> {
        let series = self.series.lock().await;
        series
            .get(series_key)
            .map(|points| {
                points
                    .iter()
                    .map(|(&start, &(state, sum))| StatisticPoint { start, state, sum })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatisticsSink for MemorySink {
    async fn append(&self, series_key: &str, points: Vec<StatisticPoint>) -> Result<()> {
        let mut series = self.series.lock().await;
        let entry = series.entry(series_key.to_string()).or_default();
        for point in points {
            entry.insert(point.start, (point.state, point.sum));
        }
        Ok(())
    }

    async fn query_range(
        &self,
        series_key: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        _granularity: Resolution,
    ) -> Result<Vec<QueriedPoint>> {
        let series = self.series.lock().await;
        let Some(points) = series.get(series_key) else {
            return Ok(Vec::new());
        };
        Ok(points
            .iter()
            .filter(|&(&ts, _)| ts >= start && end.is_none_or(|e| ts < e))
            .map(|(&ts, &(state, _))| QueriedPoint {
                start: ts,
                value: state,
            })
            .collect())
    }

    async fn last_point(&self, series_key: &str) -> Result<Option<QueriedPoint>> {
        let series = self.series.lock().await;
        Ok(series
            .get(series_key)
            .and_then(|points| points.iter().next_back())
            .map(|(&ts, &(state, _))| QueriedPoint {
                start: ts,
                value: state,
            }))
    }
}
