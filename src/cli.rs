//! CLI interface for the sfwater runner
//!
//! The binary is a thin harness around the library: it builds a coordinator
//! from flags or a config file and runs refresh cycles, eagerly once at
//! startup and then on a fixed interval.

use crate::config::SfWaterConfig;
use crate::error::{Result, SfWaterError};
use clap::Parser;
use std::path::PathBuf;

/// Track San Francisco water usage from the SFPUC portal
#[derive(Parser, Debug, Clone)]
#[command(name = "sfwater")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// SFPUC account number / username
    #[arg(long, env = "SFWATER_USERNAME")]
    pub username: Option<String>,

    /// SFPUC account password
    #[arg(long, env = "SFWATER_PASSWORD")]
    pub password: Option<String>,

    /// JSON config file (flags override its values)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// IANA timezone of the portal's timestamps
    #[arg(long)]
    pub timezone: Option<String>,

    /// Hours between refresh cycles
    #[arg(long)]
    pub interval_hours: Option<u64>,

    /// Run a single refresh cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Show debug output
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective configuration from file and flags
    pub fn resolve_config(&self) -> Result<SfWaterConfig> {
        let mut config = match &self.config {
            Some(path) => SfWaterConfig::from_file(path)?,
            None => {
                let (Some(username), Some(password)) = (&self.username, &self.password) else {
                    return Err(SfWaterError::Config(
                        "username and password are required (flags, env, or --config)".into(),
                    ));
                };
                SfWaterConfig::new(username, password)
            }
        };

        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(timezone) = &self.timezone {
            config.timezone = timezone.clone();
        }
        if let Some(hours) = self.interval_hours {
            config.update_interval_hours = hours;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sfwater").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_resolve_config_from_flags() {
        let cli = cli(&["--username", "123456", "--password", "pw"]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.username, "123456");
        assert_eq!(config.update_interval_hours, 12);
    }

    #[test]
    fn test_flag_overrides() {
        let cli = cli(&[
            "--username",
            "123456",
            "--password",
            "pw",
            "--interval-hours",
            "6",
            "--timezone",
            "UTC",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.update_interval_hours, 6);
        assert_eq!(config.timezone, "UTC");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let cli = cli(&["--once"]);
        assert!(cli.resolve_config().is_err());
    }
}
