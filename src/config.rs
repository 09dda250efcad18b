//! Runtime configuration
//!
//! Credentials plus the handful of knobs that vary between deployments.
//! Everything except the credentials has a sensible default; configuration
//! can come from CLI flags or a JSON file.

use crate::error::{Result, SfWaterError};
use crate::scraper::DEFAULT_BASE_URL;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// The utility reports timestamps in its own local zone
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";

/// Default refresh interval in hours
pub const DEFAULT_UPDATE_INTERVAL_HOURS: u64 = 12;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_update_interval_hours() -> u64 {
    DEFAULT_UPDATE_INTERVAL_HOURS
}

/// Configuration for one account
#[derive(Debug, Clone, Deserialize)]
pub struct SfWaterConfig {
    /// Portal account number / username
    pub username: String,
    /// Portal password
    pub password: String,
    /// Portal base URL, overridable for testing
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// IANA zone the portal's naive timestamps belong to
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Hours between scheduled refresh cycles
    #[serde(default = "default_update_interval_hours")]
    pub update_interval_hours: u64,
}

impl SfWaterConfig {
    /// Config with defaults for everything but the credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            base_url: default_base_url(),
            timezone: default_timezone(),
            update_interval_hours: default_update_interval_hours(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| SfWaterError::Config(format!("{}: {}", path.display(), err)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|err| SfWaterError::Config(format!("{}: {}", path.display(), err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field contents beyond what serde enforces
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(SfWaterError::Config("username must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(SfWaterError::Config("password must not be empty".into()));
        }
        self.tz()?;
        Ok(())
    }

    /// Parsed source timezone
    pub fn tz(&self) -> Result<Tz> {
        Tz::from_str(&self.timezone).map_err(|_| {
            SfWaterError::InvalidTimezone(format!(
                "'{}'. Use an IANA name like 'America/Los_Angeles' or 'UTC'",
                self.timezone
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SfWaterConfig::new("123456", "hunter2");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.update_interval_hours, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tz_parses_default_zone() {
        let config = SfWaterConfig::new("u", "p");
        assert_eq!(config.tz().unwrap(), chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut config = SfWaterConfig::new("u", "p");
        config.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.tz().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let config = SfWaterConfig::new("", "p");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SfWaterConfig =
            serde_json::from_str(r#"{"username": "123", "password": "pw"}"#).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.update_interval_hours, 12);
    }
}
