//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveTime};
use sfwater::coordinator::IssueReporter;
use sfwater::error::{Result, SfWaterError};
use sfwater::scraper::UsageSource;
use sfwater::types::{FetchWindow, UsageRecord};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One scripted reply from a [`MockSource`] fetch
pub enum Scripted {
    /// Fetch succeeds with these records
    Records(Vec<UsageRecord>),
    /// Portal did not confirm the download
    Unconfirmed,
    /// The request itself failed
    Error,
}

/// Scriptable [`UsageSource`] with call counting.
///
/// Scripted replies are consumed in order. Once the script is exhausted,
/// fetches synthesize one record per day in the requested window (usage 1.0
/// at local midnight) so orchestration tests can count insertions without
/// wiring explicit data for every window.
pub struct MockSource {
    login_ok: AtomicBool,
    login_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
    windows: Mutex<Vec<FetchWindow>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            login_ok: AtomicBool::new(true),
            login_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, script: Vec<Scripted>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_login_ok(self, ok: bool) -> Self {
        self.login_ok.store(ok, Ordering::SeqCst);
        self
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every window requested so far, in call order
    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageSource for MockSource {
    async fn login(&self) -> bool {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_ok.load(Ordering::SeqCst)
    }

    async fn fetch_usage(&self, window: &FetchWindow) -> Result<Option<Vec<UsageRecord>>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(*window);

        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Records(records)) => Ok(Some(records)),
            Some(Scripted::Unconfirmed) => Ok(None),
            Some(Scripted::Error) => Err(SfWaterError::MissingFormTokens),
            None => {
                let mut records = Vec::new();
                let mut day = window.start;
                while day <= window.end {
                    records.push(UsageRecord {
                        timestamp: day.and_time(NaiveTime::MIN),
                        usage: 1.0,
                        resolution: window.resolution,
                    });
                    day += Duration::days(1);
                }
                Ok(Some(records))
            }
        }
    }
}

/// Issue reporter that counts raise/clear calls
#[derive(Default)]
pub struct RecordingIssueReporter {
    reported: AtomicUsize,
    cleared: AtomicUsize,
}

impl RecordingIssueReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueReporter for RecordingIssueReporter {
    async fn report_invalid_credentials(&self, _account: &str) {
        self.reported.fetch_add(1, Ordering::SeqCst);
    }

    async fn clear_invalid_credentials(&self, _account: &str) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}
