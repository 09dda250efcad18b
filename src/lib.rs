//! sfwater - scrape and track San Francisco water usage data
//!
//! The SFPUC customer portal has no API; this library retrieves water
//! consumption data by driving the portal's ASP.NET forms directly:
//! - authenticated form-based scraping (view-state handshake, download
//!   trigger detection)
//! - multi-format timestamp recovery for the portal's partial encodings
//! - one-time historical backfill plus throttled incremental updates,
//!   feeding a gap-free cumulative usage series into an abstract
//!   statistics sink
//! - billing-period usage derived from the accumulated series
//!
//! # Examples
//!
//! ```no_run
//! use sfwater::{
//!     config::SfWaterConfig,
//!     coordinator::SfWaterCoordinator,
//!     statistics::MemorySink,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sfwater::Result<()> {
//!     let config = SfWaterConfig::new("account-number", "password");
//!     let sink = Arc::new(MemorySink::new());
//!     let coordinator = Arc::new(SfWaterCoordinator::new(config, sink)?);
//!
//!     let usage = coordinator.refresh().await?;
//!     println!("{:.1} gallons this billing period", usage.current_bill_usage);
//!     Ok(())
//! }
//! ```

pub mod backfill;
pub mod billing;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod incremental;
pub mod scraper;
pub mod statistics;
pub mod timestamp;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SfWaterError};
pub use types::{FetchWindow, ReportedUsage, Resolution, UsageRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
