//! One-time historical backfill orchestration
//!
//! On first run the coordinator walks backward through roughly two years of
//! portal history. Fetches run oldest-to-newest so the cumulative sum builds
//! naturally in chronological order:
//!
//! 1. monthly billed usage in a single low-volume window,
//! 2. daily usage in small chunks up to 31 days before the available
//!    boundary (the portal has a ~2 day reporting lag),
//! 3. hourly usage one day at a time covering the final stretch, starting
//!    one day past the daily range's end so no gap opens at the
//!    daily/hourly seam.
//!
//! Every chunk is retried with exponential backoff and inserted immediately
//! on success — partial progress persists and memory stays bounded. A failed
//! chunk is logged and skipped; it never aborts the rest of the backfill.

use crate::scraper::UsageSource;
use crate::statistics::{StatisticsSink, insert_usage_statistics};
use crate::types::{FetchWindow, Resolution, UsageRecord};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

/// Days before "today" after which portal data becomes queryable
pub const REPORTING_LAG_DAYS: i64 = 2;

/// Historical lookback for monthly and daily data
pub const LOOKBACK_DAYS: i64 = 730;

/// Days per daily-resolution chunk request
pub const DAILY_CHUNK_DAYS: i64 = 3;

/// Days of hourly data fetched at the tail of the backfill
pub const HOURLY_BACKFILL_DAYS: i64 = 30;

/// Minimum stored points over the trailing year that count as "history
/// already present"
pub const MIN_HISTORICAL_POINTS: usize = 300;

/// Retry and pacing knobs shared by both orchestrators.
///
/// Defaults match production behavior; tests substitute zero delays.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Attempts per chunk before it is abandoned
    pub max_attempts: u32,
    /// First retry delay; doubles on each subsequent retry
    pub base_delay: std::time::Duration,
    /// Fixed pause between chunk requests, regardless of outcome
    pub inter_request_delay: std::time::Duration,
    /// Pause before the detached backfill task starts working
    pub startup_delay: std::time::Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::from_secs(1),
            inter_request_delay: std::time::Duration::from_millis(500),
            startup_delay: std::time::Duration::from_secs(30),
        }
    }
}

impl FetchPolicy {
    /// Policy with no sleeping, for tests
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::ZERO,
            inter_request_delay: std::time::Duration::ZERO,
            startup_delay: std::time::Duration::ZERO,
        }
    }
}

/// Latest date the portal can be expected to have data for
pub fn available_end(today: NaiveDate) -> NaiveDate {
    today - Duration::days(REPORTING_LAG_DAYS)
}

/// Plan the daily backfill chunks, oldest first.
///
/// The range runs from two years before the available boundary up to 31
/// days before it; the hourly pass covers the remainder. Stopping at 31
/// rather than 30 days leaves the hourly loop one day of overlap to claim —
/// an earlier revision stopped at 30 and left a one-day hole at the seam.
pub fn daily_chunks(today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let end_available = available_end(today);
    let daily_end = end_available - Duration::days(HOURLY_BACKFILL_DAYS + 1);
    let mut current_start = end_available - Duration::days(LOOKBACK_DAYS);

    let mut chunks = Vec::new();
    while current_start < daily_end {
        let chunk_end = std::cmp::min(current_start + Duration::days(DAILY_CHUNK_DAYS), daily_end);
        chunks.push((current_start, chunk_end));
        current_start = chunk_end + Duration::days(1);
    }
    chunks
}

/// Plan the hourly backfill days, oldest first.
///
/// Covers `today - 32` through the available boundary, which starts exactly
/// one day after the daily range ends.
pub fn hourly_days(today: NaiveDate) -> Vec<NaiveDate> {
    (REPORTING_LAG_DAYS..=HOURLY_BACKFILL_DAYS + REPORTING_LAG_DAYS)
        .rev()
        .map(|offset| today - Duration::days(offset))
        .collect()
}

/// Fetch one window with bounded retries and exponential backoff.
///
/// Transport errors and unconfirmed downloads both count as failed
/// attempts. Exhaustion yields `None`; the caller moves on to the next
/// chunk.
pub async fn fetch_with_retry(
    source: &dyn UsageSource,
    window: &FetchWindow,
    policy: &FetchPolicy,
) -> Option<Vec<UsageRecord>> {
    for attempt in 0..policy.max_attempts {
        match source.fetch_usage(window).await {
            Ok(Some(records)) => return Some(records),
            Ok(None) => {
                warn!(
                    "Fetch for {} not confirmed (attempt {}/{})",
                    window,
                    attempt + 1,
                    policy.max_attempts
                );
            }
            Err(err) => {
                warn!(
                    "Fetch for {} failed (attempt {}/{}): {}",
                    window,
                    attempt + 1,
                    policy.max_attempts,
                    err
                );
            }
        }
        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.base_delay * 2u32.pow(attempt)).await;
        }
    }
    error!(
        "Abandoning {} after {} attempts",
        window, policy.max_attempts
    );
    None
}

/// Check whether the sink already holds enough history to skip the backfill.
///
/// Looks for more than [`MIN_HISTORICAL_POINTS`] points over the trailing
/// year. Query errors count as "no history" so a flaky sink cannot
/// permanently suppress the backfill.
pub async fn has_historical_data(
    sink: &dyn StatisticsSink,
    series_key: &str,
    now: DateTime<Utc>,
) -> bool {
    let one_year_ago = now - Duration::days(365);
    match sink
        .query_range(series_key, one_year_ago, None, Resolution::Hourly)
        .await
    {
        Ok(points) if points.len() > MIN_HISTORICAL_POINTS => {
            info!(
                "Found {} existing statistics records - skipping historical data fetch",
                points.len()
            );
            true
        }
        Ok(points) => {
            debug!(
                "Only {} statistics records over the trailing year - backfill needed",
                points.len()
            );
            false
        }
        Err(err) => {
            warn!("Error checking for historical data: {}", err);
            false
        }
    }
}

/// Run the full historical backfill.
///
/// Records from each successful chunk are inserted immediately rather than
/// batched across the whole walk. Individual chunk failures are logged and
/// skipped.
pub async fn run_historical_backfill(
    source: &dyn UsageSource,
    sink: &dyn StatisticsSink,
    series_key: &str,
    tz: Tz,
    today: NaiveDate,
    policy: &FetchPolicy,
) {
    info!("Fetching historical water usage data");

    // Monthly billed usage: low volume, one window covers the lookback.
    match FetchWindow::new(
        Resolution::Monthly,
        today - Duration::days(LOOKBACK_DAYS),
        today,
    ) {
        Ok(window) => {
            if let Some(records) = fetch_with_retry(source, &window, policy).await {
                info!("Fetched {} monthly billing data points", records.len());
                insert_usage_statistics(sink, series_key, tz, &records).await;
            } else {
                warn!("No monthly billing data retrieved");
            }
        }
        Err(err) => warn!("Skipping monthly backfill: {}", err),
    }
    tokio::time::sleep(policy.inter_request_delay).await;

    // Daily usage in chunks, oldest to newest.
    let chunks = daily_chunks(today);
    info!("Fetching daily data in {} chunks", chunks.len());
    let mut daily_total = 0usize;
    for (start, end) in chunks {
        match FetchWindow::new(Resolution::Daily, start, end) {
            Ok(window) => {
                debug!("Fetching daily chunk {}..{}", start, end);
                if let Some(records) = fetch_with_retry(source, &window, policy).await {
                    daily_total += records.len();
                    insert_usage_statistics(sink, series_key, tz, &records).await;
                }
            }
            Err(err) => warn!("Skipping daily chunk {}..{}: {}", start, end, err),
        }
        tokio::time::sleep(policy.inter_request_delay).await;
    }
    info!("Fetched {} daily data points total", daily_total);

    // Hourly usage one day at a time, filling the gap up to the available
    // boundary.
    let days = hourly_days(today);
    info!("Fetching hourly data for the last {} days", days.len());
    let mut hourly_total = 0usize;
    for day in days {
        debug!("Fetching hourly data for {}", day);
        let window = FetchWindow::single_day(Resolution::Hourly, day);
        if let Some(records) = fetch_with_retry(source, &window, policy).await {
            hourly_total += records.len();
            insert_usage_statistics(sink, series_key, tz, &records).await;
        }
        tokio::time::sleep(policy.inter_request_delay).await;
    }
    info!("Fetched {} hourly data points total", hourly_total);
}
