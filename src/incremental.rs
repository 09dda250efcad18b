//! Steady-state incremental updates
//!
//! Once the historical backfill has populated the sink, each coordinator
//! cycle only needs to append the gap between the last stored point and the
//! portal's reporting-lag boundary. The updater is throttled to do real work
//! at most once per 12 hours regardless of how often the host schedules the
//! coordinator.

use crate::backfill::{FetchPolicy, available_end, fetch_with_retry};
use crate::scraper::UsageSource;
use crate::statistics::{StatisticsSink, insert_usage_statistics};
use crate::types::{FetchWindow, Resolution};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

/// Minimum spacing between incremental update runs
pub const UPDATE_INTERVAL_HOURS: i64 = 12;

/// Fetch and insert new hourly data since the last stored statistic.
///
/// Returns the new throttle stamp: `now` when an update ran, the unchanged
/// `last_run` when throttled or deferred. With no prior statistic the
/// updater defers entirely to the historical backfill.
pub async fn run_incremental_update(
    source: &dyn UsageSource,
    sink: &dyn StatisticsSink,
    series_key: &str,
    tz: Tz,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &FetchPolicy,
) -> Option<DateTime<Utc>> {
    if let Some(last) = last_run
        && now - last < Duration::hours(UPDATE_INTERVAL_HOURS)
    {
        debug!("Incremental update ran recently, skipping");
        return last_run;
    }

    let last_point = match sink.last_point(series_key).await {
        Ok(point) => point,
        Err(err) => {
            warn!("Could not read last statistic, skipping update: {}", err);
            return last_run;
        }
    };
    let Some(last_point) = last_point else {
        debug!("No existing statistics, deferring to historical backfill");
        return last_run;
    };

    // One hour past the stored point avoids re-fetching its own period.
    let start_local = (last_point.start + Duration::hours(1))
        .with_timezone(&tz)
        .date_naive();
    let end_local = available_end(now.with_timezone(&tz).date_naive());

    if start_local > end_local {
        debug!("No new data expected before the reporting-lag boundary");
        return Some(now);
    }

    info!(
        "Fetching new hourly data from {} to {}",
        start_local, end_local
    );
    let mut total = 0usize;
    let mut current = start_local;
    while current <= end_local {
        let window = FetchWindow::single_day(Resolution::Hourly, current);
        if let Some(records) = fetch_with_retry(source, &window, policy).await {
            total += records.len();
            insert_usage_statistics(sink, series_key, tz, &records).await;
        }
        current += Duration::days(1);
        tokio::time::sleep(policy.inter_request_delay).await;
    }

    if total > 0 {
        info!("Fetched {} new hourly data points", total);
    } else {
        debug!("No new hourly data found");
    }
    Some(now)
}
