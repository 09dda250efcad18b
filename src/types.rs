//! Core domain types for sfwater
//!
//! This module contains the fundamental types used throughout the sfwater
//! library: resolutions, normalized usage records, bounded fetch windows,
//! and the point shapes exchanged with the statistics sink.

use crate::error::{Result, SfWaterError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity of a usage record as reported by the portal.
///
/// Monthly data corresponds to the portal's billed-usage report and is
/// aligned to billing cycles rather than calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// One record per hour
    Hourly,
    /// One record per day
    Daily,
    /// One record per billing month
    Monthly,
}

impl Resolution {
    /// Stable lowercase name, used in logs and sink queries
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
            Resolution::Monthly => "monthly",
        }
    }

    /// Maximum span in days the portal will serve for a single request
    /// at this resolution. Longer windows silently truncate on the portal
    /// side, so `FetchWindow::new` rejects them up front.
    pub fn max_span_days(&self) -> i64 {
        match self {
            Resolution::Hourly => 7,
            Resolution::Daily => 10,
            Resolution::Monthly => 762,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single normalized usage reading.
///
/// The timestamp is naive and source-local (the portal reports times in the
/// utility's own zone); localization to UTC happens at statistics insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Source-local timestamp of the reading
    pub timestamp: NaiveDateTime,
    /// Water usage in gallons for the period
    pub usage: f64,
    /// Granularity this reading was reported at
    pub resolution: Resolution,
}

/// A bounded date range for a single portal request.
///
/// Construction validates ordering and the per-resolution span limit so
/// orchestrators cannot accidentally issue a window the portal would
/// silently truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// Inclusive start date
    pub start: NaiveDate,
    /// Inclusive end date
    pub end: NaiveDate,
    /// Resolution to request
    pub resolution: Resolution,
}

impl FetchWindow {
    /// Create a validated fetch window
    pub fn new(resolution: Resolution, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(SfWaterError::InvalidWindow(format!(
                "end {end} precedes start {start}"
            )));
        }
        let span = (end - start).num_days();
        if span > resolution.max_span_days() {
            return Err(SfWaterError::InvalidWindow(format!(
                "{span} day span exceeds {} day limit for {resolution} data",
                resolution.max_span_days()
            )));
        }
        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    /// Single-day window, the shape used for all hourly requests
    pub fn single_day(resolution: Resolution, day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
            resolution,
        }
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.resolution, self.start, self.end)
    }
}

/// One point appended to the statistics sink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticPoint {
    /// Period start as an absolute UTC instant
    pub start: DateTime<Utc>,
    /// Usage for this period in gallons
    pub state: f64,
    /// Cumulative usage in gallons, non-decreasing in insertion order
    pub sum: f64,
}

/// One point returned from a statistics sink query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueriedPoint {
    /// Period start in UTC
    pub start: DateTime<Utc>,
    /// Period usage value in gallons
    pub value: f64,
}

/// Output of a refresh cycle, reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportedUsage {
    /// Usage in gallons since the start of the current billing period
    pub current_bill_usage: f64,
    /// When this value was computed
    pub last_updated: DateTime<Utc>,
}

/// Unified statistic series key for an account.
///
/// All three resolutions share one series so the cumulative consumption
/// chart is continuous across the daily/hourly boundary.
pub fn series_key(account: &str) -> String {
    let safe_account = account
        .to_lowercase()
        .replace(['-', ' '], "_");
    format!("sfwater:{safe_account}_water_consumption")
}
