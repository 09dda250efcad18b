//! Scraper protocol tests against a mock portal.
//!
//! Exercises the full GET-then-POST shape of both operations: token
//! harvesting, credential submission, redirect-based download confirmation,
//! and row parsing.

use sfwater::scraper::{SfpucScraper, UsageSource};
use sfwater::types::{FetchWindow, Resolution};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"
<html><body>
<form method="post" action="./">
    <input type="hidden" name="__EVENTTARGET" value="" />
    <input type="hidden" name="__EVENTARGUMENT" value="" />
    <input type="hidden" name="__VIEWSTATE" value="vs123" />
    <input type="hidden" name="__VIEWSTATEGENERATOR" value="gen" />
    <input type="hidden" name="__EVENTVALIDATION" value="ev456" />
    <input type="text" name="tb_USER_ID" value="" />
    <input type="password" name="tb_USER_PSWD" value="" />
</form>
</body></html>
"#;

const USAGE_PAGE: &str = r#"
<html><body>
<form method="post" action="USE_HOURLY.aspx">
    <input type="hidden" name="__VIEWSTATE" value="vs789" />
    <input type="hidden" name="__EVENTVALIDATION" value="ev012" />
    <input type="hidden" name="ctl00$opaque" value="keepme" />
    <input type="text" name="SD" value="" />
    <input type="text" name="ED" value="" />
</form>
</body></html>
"#;

fn day(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_login_success_follows_redirect_to_account_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;
    // Credentials and harvested tokens must be echoed in the POST
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string_contains("tb_USER_ID=user"))
        .and(body_string_contains("tb_USER_PSWD=pw"))
        .and(body_string_contains("__VIEWSTATE=vs123"))
        .and(body_string_contains("__EVENTVALIDATION=ev456"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/MY_ACCOUNT_RSF.aspx"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/MY_ACCOUNT_RSF.aspx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Welcome back <a href=\"/logout\">Logout</a></html>"),
        )
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    assert!(scraper.login().await);
}

#[tokio::test]
async fn test_login_fails_without_form_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"),
        )
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    assert!(!scraper.login().await);
}

#[tokio::test]
async fn test_login_fails_when_stuck_on_login_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;
    // No redirect: the portal re-renders the login page with an error
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Invalid password. Please try again.</html>"),
        )
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    assert!(!scraper.login().await);
}

#[tokio::test]
async fn test_fetch_usage_parses_confirmed_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/USE_HOURLY.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(USAGE_PAGE))
        .mount(&server)
        .await;
    // The download POST must carry the window dates, the unit selection,
    // and the page's own opaque fields.
    Mock::given(method("POST"))
        .and(path("/USE_HOURLY.aspx"))
        .and(body_string_contains("SD=06%2F10%2F2024"))
        .and(body_string_contains("ED=06%2F10%2F2024"))
        .and(body_string_contains("dl_UOM=GALLONS"))
        .and(body_string_contains("opaque=keepme"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/TRANSACTIONS_EXCEL_DOWNLOAD.aspx"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TRANSACTIONS_EXCEL_DOWNLOAD.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Date/Time\tGallons\r\n06/10/2024 01:00:00\t12.5\r\n06/10/2024 02:00:00\t8\r\nbad row\r\n",
        ))
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    let window = FetchWindow::single_day(Resolution::Hourly, day(2024, 6, 10));

    let records = scraper.fetch_usage(&window).await.unwrap().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].usage, 12.5);
    assert_eq!(
        records[0].timestamp,
        day(2024, 6, 10).and_hms_opt(1, 0, 0).unwrap()
    );
    assert_eq!(records[1].usage, 8.0);
}

#[tokio::test]
async fn test_fetch_usage_unconfirmed_when_no_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/USE_DAILY.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(USAGE_PAGE))
        .mount(&server)
        .await;
    // The portal re-renders the usage page instead of serving the report
    Mock::given(method("POST"))
        .and(path("/USE_DAILY.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(USAGE_PAGE))
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    let window = FetchWindow::new(Resolution::Daily, day(2024, 6, 1), day(2024, 6, 3)).unwrap();

    let result = scraper.fetch_usage(&window).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_fetch_usage_errors_on_tokenless_usage_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/USE_BILLED.aspx"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>no form here</body></html>"),
        )
        .mount(&server)
        .await;

    let scraper = SfpucScraper::new("user", "pw", &server.uri()).unwrap();
    let window =
        FetchWindow::new(Resolution::Monthly, day(2022, 6, 1), day(2024, 6, 1)).unwrap();

    assert!(scraper.fetch_usage(&window).await.is_err());
}
