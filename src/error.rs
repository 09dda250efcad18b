//! Error types for sfwater
//!
//! This module defines the error types used throughout the sfwater library.
//! All errors are derived from `thiserror` for convenient error handling
//! and automatic `From` implementations.
//!
//! Most scraping and sink failures are absorbed internally and logged: a
//! failed chunk fetch or an unavailable statistics sink degrades the data,
//! it does not abort a refresh cycle. The variants here cover the few
//! conditions that do surface to callers, plus the internal transport and
//! validation failures that the retry machinery inspects.

use thiserror::Error;

/// Main error type for sfwater operations
#[derive(Error, Debug)]
pub enum SfWaterError {
    /// Network error from the underlying HTTP client
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Login to the portal failed (bad credentials or unrecognized response)
    #[error("Authentication with the SFPUC portal failed")]
    AuthenticationFailed,

    /// The login page was missing its required hidden form tokens
    #[error("Required form tokens missing from portal page")]
    MissingFormTokens,

    /// A fetch window was malformed or exceeded the portal's span limit
    #[error("Invalid fetch window: {0}")]
    InvalidWindow(String),

    /// Invalid timezone identifier in configuration
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Statistics sink rejected an operation
    #[error("Statistics sink error: {0}")]
    Sink(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results in sfwater
pub type Result<T> = std::result::Result<T, SfWaterError>;
