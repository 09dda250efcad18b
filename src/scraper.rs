//! SFPUC portal scraper: authentication and usage downloads
//!
//! The portal is a stateful ASP.NET Web Forms application with no API. Every
//! page embeds single-use anti-tampering tokens (`__VIEWSTATE`,
//! `__EVENTVALIDATION`) that must be echoed back on form submission, so each
//! operation is a GET-then-POST pair against one cookie-backed session.
//!
//! Login success has no stable, documented indicator; classification is a
//! best-effort heuristic over weak textual and URL signals, kept as a named
//! strategy (`score_login_response`) so it can be tuned or replaced without
//! touching the protocol code.

use crate::error::{Result, SfWaterError};
use crate::timestamp::parse_rows;
use crate::types::{FetchWindow, Resolution, UsageRecord};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, info, warn};

/// Production portal URL
pub const DEFAULT_BASE_URL: &str = "https://myaccount-water.sfpuc.org";

/// Path fragment that confirms the download POST actually produced a report
const DOWNLOAD_CONFIRM_PATH: &str = "TRANSACTIONS_EXCEL_DOWNLOAD.aspx";

/// First `<form>` element of a page
static FORM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<form[^>]*>(.*?)</form>").expect("valid form regex"));

/// Any `<input>` tag
static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<input[^>]*>").expect("valid input regex"));

/// `name="..."` attribute
static NAME_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bname\s*=\s*["']([^"']*)["']"#).expect("valid name regex"));

/// `value="..."` attribute
static VALUE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#).expect("valid value regex"));

/// Abstraction over the portal used by the orchestrators.
///
/// The scraper is the production implementation; tests substitute scripted
/// sources to exercise retry and chunking behavior without a network.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Authenticate the session. Safe to call repeatedly; every call performs
    /// a fresh token handshake. Never raises — all failures are `false`.
    async fn login(&self) -> bool;

    /// Fetch usage rows for a bounded window.
    ///
    /// `Ok(None)` means the portal did not confirm the download (unexpected
    /// redirect target); `Err` means the request itself failed. Both are
    /// retried by callers, but only `Err` carries transport detail.
    async fn fetch_usage(&self, window: &FetchWindow) -> Result<Option<Vec<UsageRecord>>>;
}

/// Outcome of the login-response heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginScore {
    /// Count of signals suggesting an authenticated session
    pub positive: u32,
    /// Count of signals suggesting the login was rejected
    pub negative: u32,
}

impl LoginScore {
    /// Success requires at least one positive signal and zero negatives
    pub fn is_success(&self) -> bool {
        self.positive > 0 && self.negative == 0
    }
}

/// Score a post-login response by counting weak success and failure signals.
///
/// This is a best-effort classifier, not a protocol guarantee: the portal
/// has no documented success indicator, so the heuristic combines the
/// redirect target with phrases observed on authenticated and rejected
/// pages.
pub fn score_login_response(final_url: &str, body: &str) -> LoginScore {
    let body_lower = body.to_lowercase();

    let success_signals = [
        final_url.contains("MY_ACCOUNT_RSF.aspx"),
        body.contains("Welcome"),
        body.contains("Dashboard"),
        body.contains("Account"),
        body.contains("Usage"),
        body.contains("Logout"),
    ];

    let failure_signals = [
        body.contains("Invalid") && body_lower.contains("password"),
        body.contains("Login failed"),
        body.contains("Authentication failed"),
        body.contains("Error") && body_lower.contains("login"),
        body.contains("Please try again"),
        // Still sitting on the login page
        final_url.ends_with('/'),
    ];

    LoginScore {
        positive: success_signals.iter().filter(|&&s| s).count() as u32,
        negative: failure_signals.iter().filter(|&&s| s).count() as u32,
    }
}

/// Resolution-specific usage page and its "use type" form label.
///
/// The mapping is deliberately an explicit table: monthly data lives on the
/// distinct billed-usage page, so the endpoint cannot be derived from the
/// resolution name.
fn endpoint(resolution: Resolution) -> (&'static str, &'static str) {
    match resolution {
        Resolution::Hourly => ("USE_HOURLY.aspx", "Hourly+Use"),
        Resolution::Daily => ("USE_DAILY.aspx", "Daily+Use"),
        Resolution::Monthly => ("USE_BILLED.aspx", "Billed+Use"),
    }
}

/// Harvest every named `<input>` of the page's first form, in order.
///
/// Unknown field names are preserved verbatim — the portal's download
/// trigger depends on fields whose names and values are not documented.
fn extract_form_fields(html: &str) -> Vec<(String, String)> {
    let Some(form) = FORM_RE.captures(html).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    for input in INPUT_RE.find_iter(form.as_str()) {
        let tag = input.as_str();
        let Some(name) = NAME_ATTR_RE.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let value = VALUE_ATTR_RE
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        fields.push((name.as_str().to_string(), value));
    }
    fields
}

/// Replace or append form fields by name, keeping harvest order
fn overlay_fields(fields: &mut Vec<(String, String)>, overrides: Vec<(String, String)>) {
    for (name, value) in overrides {
        match fields.iter_mut().find(|(n, _)| *n == name) {
            Some(field) => field.1 = value,
            None => fields.push((name, value)),
        }
    }
}

/// Mask an account identifier for logging
fn mask_account(account: &str) -> String {
    let prefix: String = account.chars().take(3).collect();
    format!("{prefix}***")
}

/// SFPUC water usage data scraper.
///
/// Owns one cookie-backed HTTP session per account. The session is acquired
/// by `login()` at the start of a refresh cycle and implicitly released at
/// cycle end; view-state tokens are never reused across cycles.
pub struct SfpucScraper {
    username: String,
    password: String,
    base_url: String,
    client: reqwest::Client,
}

impl SfpucScraper {
    /// Create a scraper for one account.
    ///
    /// The client carries browser-mimicking headers and a cookie store; the
    /// portal rejects sessions that look like bots or drop cookies.
    pub fn new(username: &str, password: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
                 image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert(
            "Upgrade-Insecure-Requests",
            HeaderValue::from_static("1"),
        );

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Login handshake: GET the landing page, echo its tokens back with the
    /// credentials, then classify the response.
    async fn try_login(&self) -> Result<bool> {
        let login_url = format!("{}/", self.base_url);
        debug!("Fetching login page: {}", login_url);

        let response = self.client.get(&login_url).send().await?;
        debug!("Login page response status: {}", response.status());
        let page = response.text().await?;

        let fields = extract_form_fields(&page);
        let field_value = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };

        let (Some(viewstate), Some(eventvalidation)) =
            (field_value("__VIEWSTATE"), field_value("__EVENTVALIDATION"))
        else {
            warn!("Failed to extract form tokens from login page");
            return Ok(false);
        };
        let viewstate_generator = field_value("__VIEWSTATEGENERATOR").unwrap_or_default();
        debug!("Successfully extracted form tokens");

        let login_data = [
            ("__EVENTTARGET", String::new()),
            ("__EVENTARGUMENT", String::new()),
            ("__VIEWSTATE", viewstate),
            ("__VIEWSTATEGENERATOR", viewstate_generator),
            ("__SCROLLPOSITIONX", "0".to_string()),
            ("__SCROLLPOSITIONY", "0".to_string()),
            ("__EVENTVALIDATION", eventvalidation),
            ("tb_USER_ID", self.username.clone()),
            ("tb_USER_PSWD", self.password.clone()),
            ("cb_REMEMBER_ME", "on".to_string()),
            ("btn_SIGN_IN_BUTTON", "Sign+in".to_string()),
        ];

        debug!("Submitting login form");
        let response = self.client.post(&login_url).form(&login_data).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        debug!("Login response status: {}, URL: {}", status, final_url);

        if !status.is_success() {
            warn!("Login failed with status code: {}", status);
            return Ok(false);
        }

        let body = response.text().await?;
        let score = score_login_response(&final_url, &body);
        debug!(
            "Login analysis - success signals: {}, failure signals: {}",
            score.positive, score.negative
        );

        if score.is_success() {
            info!("Login successful for account: {}", mask_account(&self.username));
            Ok(true)
        } else {
            warn!(
                "Login failed for account {} - success signals: {}, failure signals: {}",
                mask_account(&self.username),
                score.positive,
                score.negative
            );
            Ok(false)
        }
    }
}

#[async_trait]
impl UsageSource for SfpucScraper {
    async fn login(&self) -> bool {
        match self.try_login().await {
            Ok(success) => success,
            Err(err) => {
                warn!(
                    "Exception during login for account {}: {}",
                    mask_account(&self.username),
                    err
                );
                false
            }
        }
    }

    async fn fetch_usage(&self, window: &FetchWindow) -> Result<Option<Vec<UsageRecord>>> {
        let (page, use_type) = endpoint(window.resolution);
        let usage_url = format!("{}/{}", self.base_url, page);
        debug!("Navigating to usage page: {}", usage_url);

        let response = self.client.get(&usage_url).send().await?;
        debug!("Usage page response status: {}", response.status());
        let page_html = response.text().await?;

        let mut fields = extract_form_fields(&page_html);
        debug!("Extracted {} form fields", fields.len());
        if !fields.iter().any(|(name, _)| name == "__VIEWSTATE") {
            warn!("Usage page is missing its view-state token");
            return Err(SfWaterError::MissingFormTokens);
        }

        overlay_fields(
            &mut fields,
            vec![
                ("img_EXCEL_DOWNLOAD_IMAGE.x".to_string(), "8".to_string()),
                ("img_EXCEL_DOWNLOAD_IMAGE.y".to_string(), "13".to_string()),
                ("tb_DAILY_USE".to_string(), use_type.to_string()),
                ("SD".to_string(), window.start.format("%m/%d/%Y").to_string()),
                ("ED".to_string(), window.end.format("%m/%d/%Y").to_string()),
                ("dl_UOM".to_string(), "GALLONS".to_string()),
            ],
        );

        debug!("Triggering report download from: {}", usage_url);
        let response = self.client.post(&usage_url).form(&fields).send().await?;
        let final_url = response.url().to_string();
        debug!(
            "Download response status: {}, URL: {}",
            response.status(),
            final_url
        );

        if !final_url.contains(DOWNLOAD_CONFIRM_PATH) {
            warn!("Download failed - unexpected URL: {}", final_url);
            return Ok(None);
        }

        let body = response.text().await?;
        let records = parse_rows(&body, window.resolution, window.start, window.end);
        info!(
            "Parsed {} {} data points for {}",
            records.len(),
            window.resolution,
            window
        );
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_form_fields_preserves_unknown_fields() {
        let html = r#"
            <html><body>
            <form action="/USE_DAILY.aspx" method="post">
                <input type="hidden" name="__VIEWSTATE" value="vs123" />
                <input type="hidden" name="__EVENTVALIDATION" value="ev456" />
                <input type="hidden" name="ctl00$mystery" value="opaque" />
                <input type="text" name="SD" value="" />
                <input type="submit" value="Go" />
            </form>
            </body></html>
        "#;
        let fields = extract_form_fields(html);
        assert_eq!(
            fields,
            vec![
                ("__VIEWSTATE".to_string(), "vs123".to_string()),
                ("__EVENTVALIDATION".to_string(), "ev456".to_string()),
                ("ctl00$mystery".to_string(), "opaque".to_string()),
                ("SD".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_extract_form_fields_only_first_form() {
        let html = r#"
            <form><input name="a" value="1"></form>
            <form><input name="b" value="2"></form>
        "#;
        let fields = extract_form_fields(html);
        assert_eq!(fields, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_extract_form_fields_no_form() {
        assert!(extract_form_fields("<html><body>nothing</body></html>").is_empty());
    }

    #[test]
    fn test_overlay_fields_replaces_and_appends() {
        let mut fields = vec![
            ("SD".to_string(), "old".to_string()),
            ("keep".to_string(), "x".to_string()),
        ];
        overlay_fields(
            &mut fields,
            vec![
                ("SD".to_string(), "01/02/2024".to_string()),
                ("dl_UOM".to_string(), "GALLONS".to_string()),
            ],
        );
        assert_eq!(
            fields,
            vec![
                ("SD".to_string(), "01/02/2024".to_string()),
                ("keep".to_string(), "x".to_string()),
                ("dl_UOM".to_string(), "GALLONS".to_string()),
            ]
        );
    }

    #[test]
    fn test_endpoint_table() {
        assert_eq!(
            endpoint(Resolution::Hourly),
            ("USE_HOURLY.aspx", "Hourly+Use")
        );
        assert_eq!(endpoint(Resolution::Daily), ("USE_DAILY.aspx", "Daily+Use"));
        // Monthly uses the distinct billed-usage page
        assert_eq!(
            endpoint(Resolution::Monthly),
            ("USE_BILLED.aspx", "Billed+Use")
        );
    }

    #[test]
    fn test_login_score_table() {
        struct Case {
            name: &'static str,
            url: &'static str,
            body: &'static str,
            success: bool,
        }
        let cases = [
            Case {
                name: "authenticated redirect with welcome text",
                url: "https://portal.example/MY_ACCOUNT_RSF.aspx",
                body: "<html>Welcome back <a>Logout</a></html>",
                success: true,
            },
            Case {
                name: "dashboard text alone is a positive",
                url: "https://portal.example/home",
                body: "<html>Dashboard</html>",
                success: true,
            },
            Case {
                name: "stuck on login root",
                url: "https://portal.example/",
                body: "<html>Sign in</html>",
                success: false,
            },
            Case {
                name: "invalid password outweighs account text",
                url: "https://portal.example/MY_ACCOUNT_RSF.aspx",
                body: "<html>Account: Invalid password, Please try again</html>",
                success: false,
            },
            Case {
                name: "no signals at all",
                url: "https://portal.example/unknown",
                body: "<html></html>",
                success: false,
            },
        ];

        for case in cases {
            let score = score_login_response(case.url, case.body);
            assert_eq!(score.is_success(), case.success, "case: {}", case.name);
        }
    }

    #[test]
    fn test_mask_account() {
        assert_eq!(mask_account("1234567"), "123***");
        assert_eq!(mask_account("ab"), "ab***");
    }
}
