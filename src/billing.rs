//! Billing period calculation
//!
//! The utility bills on a recurring day of the month (the anchor day). The
//! current billing window is derived from that anchor and today's date; the
//! anchor itself can be detected from historical monthly billing records,
//! falling back to the utility's typical 25th.

use crate::statistics::StatisticsSink;
use crate::types::Resolution;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Anchor day used when detection has nothing to work with
pub const DEFAULT_BILLING_DAY: u32 = 25;

/// Trailing window inspected when detecting the anchor day
const DETECTION_LOOKBACK_DAYS: i64 = 90;

/// Number of days in a calendar month
fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Anchor date within a month, clamping anchor days past the month's end
/// (an anchor of 31 lands on February 28/29).
fn anchor_date(year: i32, month: u32, anchor_day: u32) -> NaiveDate {
    let day = anchor_day.clamp(1, days_in_month(year, month));
    // Clamped day is always valid for the month
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
        .unwrap_or_default()
}

/// Calculate the billing period containing `today`.
///
/// Before the anchor day the period runs from last month's anchor to this
/// month's; on or after it, from this month's anchor to next month's. Year
/// boundaries roll over in both directions.
pub fn calculate_billing_period(anchor_day: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let current = anchor_date(today.year(), today.month(), anchor_day);

    // Compare against the clamped anchor date, not the raw day number: with
    // anchor 31, February 28 is on this month's anchor, not before it.
    if today < current {
        let (prev_year, prev_month) = if today.month() == 1 {
            (today.year() - 1, 12)
        } else {
            (today.year(), today.month() - 1)
        };
        (anchor_date(prev_year, prev_month, anchor_day), current)
    } else {
        let (next_year, next_month) = if today.month() == 12 {
            (today.year() + 1, 1)
        } else {
            (today.year(), today.month() + 1)
        };
        (current, anchor_date(next_year, next_month, anchor_day))
    }
}

/// Detect the billing anchor day from stored monthly billing records.
///
/// Takes the most frequent day-of-month (in source-local time) across
/// monthly records from the trailing 90 days; needs at least two records,
/// otherwise falls back to [`DEFAULT_BILLING_DAY`]. The caller caches the
/// result for the process lifetime.
pub async fn detect_anchor_day(
    sink: &dyn StatisticsSink,
    series_key: &str,
    tz: Tz,
    now: DateTime<Utc>,
) -> u32 {
    let lookback_start = now - Duration::days(DETECTION_LOOKBACK_DAYS);
    let points = match sink
        .query_range(series_key, lookback_start, None, Resolution::Monthly)
        .await
    {
        Ok(points) => points,
        Err(err) => {
            warn!(
                "Failed to detect billing day, using default {}: {}",
                DEFAULT_BILLING_DAY, err
            );
            return DEFAULT_BILLING_DAY;
        }
    };

    if points.len() < 2 {
        info!("Using default billing day: {}", DEFAULT_BILLING_DAY);
        return DEFAULT_BILLING_DAY;
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for point in &points {
        let local_day = point.start.with_timezone(&tz).day();
        *counts.entry(local_day).or_default() += 1;
    }

    // Most frequent day; ties break toward the smaller day for determinism
    let detected = counts
        .into_iter()
        .max_by_key(|&(day, count)| (count, std::cmp::Reverse(day)))
        .map(|(day, _)| day)
        .unwrap_or(DEFAULT_BILLING_DAY);

    info!(
        "Detected billing day: {} (from {} monthly records)",
        detected,
        points.len()
    );
    detected
}

/// Sum usage since the billing period started.
///
/// Reads period values (not cumulative sums — stored states are already
/// period-granular increments) at daily granularity between the period
/// start and now. Reports 0 when the sink has no matching records.
pub async fn current_period_usage(
    sink: &dyn StatisticsSink,
    series_key: &str,
    tz: Tz,
    period_start: NaiveDate,
    now: DateTime<Utc>,
) -> f64 {
    let period_start_local = period_start.and_time(NaiveTime::MIN);
    let start_utc = match tz.from_local_datetime(&period_start_local) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => period_start_local.and_utc(),
    };

    match sink
        .query_range(series_key, start_utc, Some(now), Resolution::Daily)
        .await
    {
        Ok(points) if points.is_empty() => {
            warn!("No statistics found for current billing period");
            0.0
        }
        Ok(points) => {
            let total: f64 = points.iter().map(|p| p.value).sum();
            debug!(
                "Current billing period usage: {:.2} gallons from {} points",
                total,
                points.len()
            );
            total
        }
        Err(err) => {
            warn!("Failed to calculate usage from statistics: {}", err);
            0.0
        }
    }
}
