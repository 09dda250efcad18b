//! Timestamp parsing for portal download rows
//!
//! The portal emits timestamps in several encodings depending on account,
//! locale, and report vintage, and most of them omit part of the date. Each
//! resolution therefore has an ordered list of parse attempts, tried
//! first-match-wins; new encodings can be appended without touching existing
//! ones. Missing components are reconstructed from the requested fetch
//! window, never from "today" — hourly reports are historical and may be
//! fetched for past days.
//!
//! A row whose timestamp matches no encoding is dropped by the caller; it is
//! a per-row skip, not a fetch failure.

use crate::types::{Resolution, UsageRecord};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

/// A single parse attempt for one timestamp encoding.
///
/// Receives the raw text plus the requested window bounds for
/// disambiguation, and returns `None` when the encoding does not match.
type ParseAttempt = fn(&str, NaiveDate, NaiveDate) -> Option<NaiveDateTime>;

/// Ordered encodings per resolution, first-match-wins
fn attempts_for(resolution: Resolution) -> &'static [ParseAttempt] {
    match resolution {
        Resolution::Hourly => &[parse_hourly_full, parse_hourly_am_pm],
        Resolution::Daily => &[parse_daily_full, parse_daily_month_day],
        Resolution::Monthly => &[parse_monthly_numeric, parse_monthly_abbrev],
    }
}

/// Parse a raw portal timestamp into a source-local datetime.
///
/// `window_start` and `window_end` are the bounds of the fetch request the
/// row came from; they supply the year or date components the portal's
/// compact encodings omit.
pub fn parse_timestamp(
    resolution: Resolution,
    raw: &str,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    attempts_for(resolution)
        .iter()
        .find_map(|attempt| attempt(raw, window_start, window_end))
}

/// Parse a downloaded report body into usage records.
///
/// The body is newline-delimited, tab-separated, with one header line.
/// Rows with unparseable timestamps or quantities are dropped with a debug
/// log; they never fail the fetch.
pub fn parse_rows(
    body: &str,
    resolution: Resolution,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Vec<UsageRecord> {
    let mut records = Vec::new();

    for line in body.lines().skip(1) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let mut parts = line.split('\t');
        let (Some(timestamp_str), Some(usage_str)) = (parts.next(), parts.next()) else {
            debug!("Skipping malformed {} row: {}", resolution, line);
            continue;
        };

        let usage = match usage_str.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => value,
            _ => {
                debug!("Skipping {} row with bad quantity: {}", resolution, line);
                continue;
            }
        };

        let Some(timestamp) = parse_timestamp(resolution, timestamp_str, window_start, window_end)
        else {
            debug!(
                "Failed to parse {} timestamp: {}",
                resolution,
                timestamp_str.trim()
            );
            continue;
        };

        records.push(UsageRecord {
            timestamp,
            usage,
            resolution,
        });
    }

    records
}

/// Full hourly encoding: `MM/DD/YYYY HH:MM:SS`
fn parse_hourly_full(raw: &str, _start: NaiveDate, _end: NaiveDate) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%m/%d/%Y %H:%M:%S").ok()
}

/// Bare hourly encoding: `"12 AM"`, `"1 PM"`, no date.
///
/// The date is the requested window's end date. The portal serves hourly
/// reports one day at a time, so the end date is the day the report covers.
fn parse_hourly_am_pm(raw: &str, _start: NaiveDate, end: NaiveDate) -> Option<NaiveDateTime> {
    let mut parts = raw.split_whitespace();
    let hour_str = parts.next()?;
    let meridiem = parts.next()?.to_uppercase();
    if parts.next().is_some() {
        return None;
    }

    let hour: u32 = hour_str.parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match meridiem.as_str() {
        "AM" if hour == 12 => 0,
        "AM" => hour,
        "PM" if hour == 12 => 12,
        "PM" => hour + 12,
        _ => return None,
    };

    Some(NaiveDateTime::new(end, NaiveTime::from_hms_opt(hour, 0, 0)?))
}

/// Full daily encoding: `MM/DD/YYYY`
fn parse_daily_full(raw: &str, _start: NaiveDate, _end: NaiveDate) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()?;
    Some(NaiveDateTime::new(date, NaiveTime::MIN))
}

/// Bare daily encoding: `MM/DD`, no year.
///
/// The year comes from the requested start date, then gets corrected when
/// the naive reconstruction lands outside a window that crosses a year
/// boundary: a December request parsing a January row rolls forward, a
/// January request parsing a December row rolls back.
fn parse_daily_month_day(raw: &str, start: NaiveDate, end: NaiveDate) -> Option<NaiveDateTime> {
    let mut parts = raw.split('/');
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let year = start.year();
    let mut date = NaiveDate::from_ymd_opt(year, month, day)?;

    if date < start && start.month() == 12 && month == 1 {
        date = NaiveDate::from_ymd_opt(year + 1, month, day)?;
    } else if date > end && end.month() == 1 && month == 12 {
        date = NaiveDate::from_ymd_opt(year - 1, month, day)?;
    }

    Some(NaiveDateTime::new(date, NaiveTime::MIN))
}

/// Numeric monthly encoding: `MM/YYYY`
fn parse_monthly_numeric(raw: &str, _start: NaiveDate, _end: NaiveDate) -> Option<NaiveDateTime> {
    let mut parts = raw.split('/');
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year_str = parts.next()?.trim();
    if parts.next().is_some() || year_str.len() != 4 {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(NaiveDateTime::new(date, NaiveTime::MIN))
}

/// Abbreviated monthly encoding: `"Dec 23"`. Two-digit years map to 2000+YY.
fn parse_monthly_abbrev(raw: &str, _start: NaiveDate, _end: NaiveDate) -> Option<NaiveDateTime> {
    let mut parts = raw.split_whitespace();
    let month_name = parts.next()?;
    let year_str = parts.next()?;
    if parts.next().is_some() || year_str.len() != 2 {
        return None;
    }

    let month = month_from_abbrev(month_name)?;
    let year = 2000 + year_str.parse::<i32>().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(NaiveDateTime::new(date, NaiveTime::MIN))
}

/// Map an English month abbreviation to its 1-based month number
fn month_from_abbrev(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|&m| m == lower)
        .map(|idx| idx as u32 + 1)
}
