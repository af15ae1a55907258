//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the directory site and for a
//! Browserless-compatible rendering service, and exercise the light channel,
//! a full crawl and the detail pipeline end to end.

use directory_harvest::config::load_config;
use directory_harvest::crawler::{load_categories, Coordinator, CrawlOptions};
use directory_harvest::details::{run_details, DetailOptions, DetailStatus};
use directory_harvest::fetch::{DelayRange, FailureKind, HttpChannel, RetryPolicy};
use directory_harvest::output::RunOutcome;
use directory_harvest::storage::{read_json, RecordMap};
use directory_harvest::{FetchChannel, FetchStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHALLENGE_PAGE: &str =
    "<html><head><title>Just a moment...</title></head><body>checking</body></html>";

/// Light channel with no delay and fast backoff, bypassing any system proxy
fn light_channel() -> HttpChannel {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpChannel::with_client(
        client,
        4,
        DelayRange::none(),
        RetryPolicy::new(3, Duration::from_millis(10)),
    )
}

/// A 36-character identifier unique per (category, n)
fn identifier(category: u32, n: u32) -> String {
    format!("{:08x}-0000-4000-8000-{:012x}", category, n)
}

fn card(id: &str) -> String {
    format!(
        r#"<div class="serp-container">
            <h2 class="full-name"><a href="/lawyer/someone/{id}.html?adSubId=1">Name {id}</a></h2>
            <a class="single-link" href="/firm/x">Firm</a>
            <a href="tel:+13105550000">Call</a>
        </div>"#
    )
}

fn listing_page(ids: &[String], last_page: Option<u32>) -> String {
    let cards: String = ids.iter().map(|id| card(id)).collect();
    let pagination = match last_page {
        Some(last) => {
            let links: String = (2..=last)
                .map(|p| format!(r#"<a href="?page={p}">{p}</a>"#))
                .collect();
            format!(r#"<div class="pagination">{}</div>"#, links)
        }
        None => String::new(),
    };
    format!("<html><body>{}{}</body></html>", cards, pagination)
}

fn ids(category: u32, range: std::ops::Range<u32>) -> Vec<String> {
    range.map(|n| identifier(category, n)).collect()
}

fn write_config(dir: &Path, site: &str, browser: &str) -> std::path::PathBuf {
    let data_dir = dir.join("data");
    let profile_dir = dir.join("profiles");
    let content = format!(
        r#"
[site]
listing-url = "{site}/{{category}}/?page={{page}}"
referer = "{site}/"
detail-referer = "{site}/"

[light]
max-concurrent = 4
delay-min-ms = 0
delay-max-ms = 0

[browser]
endpoints = ["{browser}"]
tabs = 2
delay-min-ms = 0
delay-max-ms = 0
settle-ms = 0
profile-dir = "{profile_dir}"

[retry]
max-attempts = 2
backoff-base-ms = 10

[crawl]
bulk-concurrency = 4

[output]
data-dir = "{data_dir}"
"#,
        site = site,
        browser = browser,
        profile_dir = profile_dir.display(),
        data_dir = data_dir.display()
    );
    let path = dir.join("harvest.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_light_channel_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tax/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = light_channel()
        .fetch(&format!("{}/tax/?page=1", server.uri()), Some("https://d.test/"))
        .await;

    assert_eq!(outcome.status, FetchStatus::Success);
    assert_eq!(outcome.body.as_deref(), Some("<html>ok</html>"));
    assert_eq!(outcome.status_code, Some(200));
}

#[tokio::test]
async fn test_light_channel_challenge_body_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string(CHALLENGE_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = light_channel().fetch(&server.uri(), None).await;

    assert_eq!(outcome.status, FetchStatus::Blocked);
    assert_eq!(outcome.failure, Some(FailureKind::Challenge));
}

#[tokio::test]
async fn test_light_channel_mitigation_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("cf-mitigated", "challenge")
                .set_body_string("<html></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = light_channel().fetch(&server.uri(), None).await;

    assert!(outcome.is_blocked());
}

#[tokio::test]
async fn test_light_channel_not_found_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = light_channel().fetch(&server.uri(), None).await;

    assert_eq!(outcome.status, FetchStatus::Failed);
    assert_eq!(outcome.failure, Some(FailureKind::NotFound));
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_light_channel_retries_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let outcome = light_channel().fetch(&server.uri(), None).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
}

/// Mounts a two-category site: "tax" has three pages with page 3 behind a
/// challenge on the light channel, "estate" has a single page.
async fn mount_site(site: &MockServer, browser: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/tax/"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&ids(1, 0..5), Some(3))))
        .mount(site)
        .await;
    Mock::given(method("GET"))
        .and(path("/tax/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&ids(1, 5..10), Some(3))))
        .mount(site)
        .await;
    Mock::given(method("GET"))
        .and(path("/tax/"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(403).set_body_string(CHALLENGE_PAGE))
        .mount(site)
        .await;
    Mock::given(method("GET"))
        .and(path("/estate/"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&ids(2, 0..5), None)))
        .mount(site)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/lawyer/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>profile</html>"))
        .mount(site)
        .await;

    Mock::given(method("GET"))
        .and(path("/json/version"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"Browser":"HeadlessChrome/124.0"}"#),
        )
        .mount(browser)
        .await;
    Mock::given(method("POST"))
        .and(path("/content"))
        .and(body_string_contains("/tax/?page=3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-response-code", "200")
                .set_body_string(listing_page(&ids(1, 10..15), Some(3))),
        )
        .expect(1)
        .mount(browser)
        .await;
}

async fn detail_requests(site: &MockServer) -> usize {
    site.received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path().starts_with("/lawyer/"))
        .count()
}

#[tokio::test]
async fn test_full_crawl_then_details() {
    let site = MockServer::start().await;
    let browser = MockServer::start().await;
    mount_site(&site, &browser).await;

    let dir = TempDir::new().unwrap();
    let config = load_config(&write_config(dir.path(), &site.uri(), &browser.uri())).unwrap();

    let categories_path = dir.path().join("categories.json");
    std::fs::write(&categories_path, r#"{"categories": ["tax", "estate"]}"#).unwrap();
    let categories = load_categories(&categories_path).unwrap();

    let coordinator = Coordinator::new(&config).unwrap();
    let summary = coordinator
        .run(&categories, CrawlOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.pages_escalated, 1);
    assert_eq!(summary.fallback_pages, 1);
    assert_eq!(summary.merged_records, 20);

    let layout = coordinator.layout();
    let listings: RecordMap = read_json(&layout.listings_path()).unwrap();
    assert_eq!(listings.len(), 20);
    let record = &listings[&identifier(1, 12)];
    assert_eq!(record.phone, "3105550000");
    assert!(!record.detail_url.contains('?'));
    assert!(layout.checkpoints().completed().unwrap().is_empty());

    // Details: every document fetched once, then nothing on a second run
    let first = run_details(&config, DetailOptions::default()).await.unwrap();
    assert_eq!(first.success, 20);
    assert_eq!(first.escalated, 0);
    assert_eq!(detail_requests(&site).await, 20);

    let statuses: BTreeMap<String, DetailStatus> =
        read_json(&layout.fetch_status_path()).unwrap();
    assert!(statuses.values().all(|s| *s == DetailStatus::Success));

    let second = run_details(&config, DetailOptions::default()).await.unwrap();
    assert_eq!(second.skipped, 20);
    assert_eq!(second.fetched(), 0);
    assert_eq!(detail_requests(&site).await, 20);
}

#[tokio::test]
async fn test_unreachable_browser_aborts_crawl() {
    let site = MockServer::start().await;
    let browser = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/version"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&browser)
        .await;

    let dir = TempDir::new().unwrap();
    let config = load_config(&write_config(dir.path(), &site.uri(), &browser.uri())).unwrap();

    let coordinator = Coordinator::new(&config).unwrap();
    let result = coordinator
        .run(&["tax".to_string()], CrawlOptions::default())
        .await;

    assert!(result.is_err());
    assert!(site.received_requests().await.unwrap_or_default().is_empty());
}
