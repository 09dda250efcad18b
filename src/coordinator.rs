//! Per-account refresh coordinator
//!
//! One coordinator owns the scraping session, the orchestration state, and
//! the refresh cycle for a single account. `refresh()` is the entry point
//! the host scheduler invokes (eagerly at startup, then periodically):
//! login, optional background-backfill scheduling, throttled incremental
//! update, then the billing-period usage calculation that produces the
//! reported value.
//!
//! Only authentication failure surfaces as a cycle failure; every other
//! problem degrades to stale or partial data and is logged.

use crate::backfill::{FetchPolicy, has_historical_data, run_historical_backfill};
use crate::billing::{calculate_billing_period, current_period_usage, detect_anchor_day};
use crate::config::SfWaterConfig;
use crate::error::{Result, SfWaterError};
use crate::incremental::run_incremental_update;
use crate::scraper::{SfpucScraper, UsageSource};
use crate::statistics::StatisticsSink;
use crate::types::{ReportedUsage, series_key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Issue identifier raised when the portal rejects the credentials
pub const ISSUE_INVALID_CREDENTIALS: &str = "invalid_credentials";

/// Channel for credential-repair signals to the host.
///
/// A failed login raises the issue; the next successful login clears it.
#[async_trait]
pub trait IssueReporter: Send + Sync {
    /// Raise the invalid-credentials issue for an account
    async fn report_invalid_credentials(&self, account: &str);

    /// Clear the invalid-credentials issue for an account
    async fn clear_invalid_credentials(&self, account: &str);
}

/// Default reporter that only logs; hosts substitute their own
pub struct LogIssueReporter;

#[async_trait]
impl IssueReporter for LogIssueReporter {
    async fn report_invalid_credentials(&self, account: &str) {
        warn!(
            "Issue {} raised for account {}",
            ISSUE_INVALID_CREDENTIALS, account
        );
    }

    async fn clear_invalid_credentials(&self, account: &str) {
        debug!(
            "Issue {} cleared for account {}",
            ISSUE_INVALID_CREDENTIALS, account
        );
    }
}

/// Mutable orchestration state for one account.
///
/// Owned by the coordinator with single-writer semantics; the background
/// backfill task is the only other writer and touches only its own flags.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Whether the sink has been checked for pre-existing history
    pub checked_for_historical: bool,
    /// Whether the historical backfill completed (or was unnecessary)
    pub historical_fetched: bool,
    /// Whether a backfill task is currently scheduled or running
    pub backfill_in_flight: bool,
    /// Throttle stamp for the incremental updater
    pub last_incremental: Option<DateTime<Utc>>,
    /// Billing anchor day, cached after first detection
    pub billing_day: Option<u32>,
}

/// Coordinator for one configured account
pub struct SfWaterCoordinator {
    config: SfWaterConfig,
    tz: Tz,
    series_key: String,
    source: RwLock<Arc<dyn UsageSource>>,
    sink: Arc<dyn StatisticsSink>,
    issues: Arc<dyn IssueReporter>,
    policy: FetchPolicy,
    state: Mutex<CoordinatorState>,
}

impl SfWaterCoordinator {
    /// Create a coordinator with the production scraper
    pub fn new(config: SfWaterConfig, sink: Arc<dyn StatisticsSink>) -> Result<Self> {
        let scraper: Arc<dyn UsageSource> = Arc::new(SfpucScraper::new(
            &config.username,
            &config.password,
            &config.base_url,
        )?);
        Self::with_source(config, scraper, sink)
    }

    /// Create a coordinator with an injected usage source
    pub fn with_source(
        config: SfWaterConfig,
        source: Arc<dyn UsageSource>,
        sink: Arc<dyn StatisticsSink>,
    ) -> Result<Self> {
        let tz = config.tz()?;
        let series_key = series_key(&config.username);
        Ok(Self {
            config,
            tz,
            series_key,
            source: RwLock::new(source),
            sink,
            issues: Arc::new(LogIssueReporter),
            policy: FetchPolicy::default(),
            state: Mutex::new(CoordinatorState::default()),
        })
    }

    /// Replace the issue reporter
    pub fn with_issue_reporter(mut self, issues: Arc<dyn IssueReporter>) -> Self {
        self.issues = issues;
        self
    }

    /// Replace the fetch policy
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Unified statistic series key for this account
    pub fn series_key(&self) -> &str {
        &self.series_key
    }

    /// Snapshot of the orchestration state, for inspection
    pub async fn state_snapshot(&self) -> CoordinatorState {
        self.state.lock().await.clone()
    }

    /// Replace the scraping session after a credential update.
    ///
    /// The old session is dropped; the next refresh performs a fresh
    /// handshake with the new credentials.
    pub async fn update_credentials(&self, username: &str, password: &str) -> Result<()> {
        info!("Updating credentials");
        let scraper: Arc<dyn UsageSource> =
            Arc::new(SfpucScraper::new(username, password, &self.config.base_url)?);
        *self.source.write().await = scraper;
        Ok(())
    }

    /// Run one refresh cycle
    pub async fn refresh(self: &Arc<Self>) -> Result<ReportedUsage> {
        self.refresh_at(Utc::now()).await
    }

    /// Run one refresh cycle against an explicit clock, for tests
    pub async fn refresh_at(self: &Arc<Self>, now: DateTime<Utc>) -> Result<ReportedUsage> {
        debug!("Starting data update cycle");
        let source = self.source.read().await.clone();

        if !source.login().await {
            error!("Failed to login to SFPUC - aborting update");
            self.issues
                .report_invalid_credentials(&self.config.username)
                .await;
            return Err(SfWaterError::AuthenticationFailed);
        }
        self.issues
            .clear_invalid_credentials(&self.config.username)
            .await;
        debug!("Login successful, proceeding with data fetch");

        self.maybe_schedule_backfill(now).await;

        let billing_day = self.billing_anchor_day(now).await;

        // Throttled incremental update; failures degrade, never abort.
        let last_run = self.state.lock().await.last_incremental;
        let updated = run_incremental_update(
            &*source,
            &*self.sink,
            &self.series_key,
            self.tz,
            last_run,
            now,
            &self.policy,
        )
        .await;
        self.state.lock().await.last_incremental = updated;

        let today_local = now.with_timezone(&self.tz).date_naive();
        let (bill_start, bill_end) = calculate_billing_period(billing_day, today_local);
        debug!("Current billing period: {} to {}", bill_start, bill_end);

        let current_bill_usage =
            current_period_usage(&*self.sink, &self.series_key, self.tz, bill_start, now).await;

        info!(
            "Data update completed - current billing period usage: {:.2} gallons",
            current_bill_usage
        );
        Ok(ReportedUsage {
            current_bill_usage,
            last_updated: now,
        })
    }

    /// Check for existing history once, then schedule the backfill task if
    /// needed. The task is single-flight: `backfill_in_flight` guards
    /// double scheduling and `historical_fetched` is set only when the
    /// task runs to completion.
    async fn maybe_schedule_backfill(self: &Arc<Self>, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;

        if !state.checked_for_historical {
            state.checked_for_historical = true;
            if has_historical_data(&*self.sink, &self.series_key, now).await {
                state.historical_fetched = true;
                info!("Historical data already present - skipping fetch");
            }
        }

        if state.historical_fetched || state.backfill_in_flight {
            return;
        }
        state.backfill_in_flight = true;
        drop(state);

        info!("Scheduling historical data fetch in background");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_background_backfill().await;
        });
    }

    /// Detached backfill task body: wait out the startup delay so initial
    /// availability is never blocked, then walk the full history.
    async fn run_background_backfill(self: Arc<Self>) {
        tokio::time::sleep(self.policy.startup_delay).await;
        info!("Starting background historical data fetch");

        let source = self.source.read().await.clone();
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        run_historical_backfill(
            &*source,
            &*self.sink,
            &self.series_key,
            self.tz,
            today,
            &self.policy,
        )
        .await;

        let mut state = self.state.lock().await;
        state.historical_fetched = true;
        state.backfill_in_flight = false;
        info!("Background historical data fetch completed");
    }

    /// Billing anchor day, detected once and cached for the process lifetime
    async fn billing_anchor_day(&self, now: DateTime<Utc>) -> u32 {
        let mut state = self.state.lock().await;
        match state.billing_day {
            Some(day) => day,
            None => {
                let day = detect_anchor_day(&*self.sink, &self.series_key, self.tz, now).await;
                state.billing_day = Some(day);
                day
            }
        }
    }
}
