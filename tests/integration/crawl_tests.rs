//! Integration tests for the archiver
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! archive cycle end-to-end against a temporary archive root.

use std::collections::HashSet;
use web_archive::config::{AssessmentStrategy, Config};
use web_archive::crawler::Coordinator;
use web_archive::output::{BrokenLink, CrawlResult, RunStatus, Termination};
use web_archive::storage::Manifest;
use web_archive::FailureReason;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration seeded at the given server
fn create_test_config(base_url: &str, root: &tempfile::TempDir) -> Config {
    let mut config = Config::for_seed(format!("{}/", base_url));
    config.output.archive_root = root.path().to_path_buf();
    config.crawler.per_host_interval_ms = 0;
    config.crawler.retry_count = 0;
    config.crawler.max_concurrent_fetches = 4;
    config
}

fn html(body: impl Into<String>) -> ResponseTemplate {
    let body: String = body.into();
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/html")
}

async fn mount_page(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

fn load_manifest(result: &CrawlResult) -> Manifest {
    let content = std::fs::read_to_string(&result.manifest_path).expect("Failed to read manifest");
    serde_json::from_str(&content).expect("Failed to parse manifest")
}

#[tokio::test]
async fn test_broken_link_is_reported() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        html(r#"<html><body>
            <a href="/about">About</a>
            <a href="/contact">Contact</a>
            </body></html>"#),
    )
    .await;
    mount_page(&mock_server, "/about", html(r#"<a href="/missing">Missing</a>"#)).await;
    mount_page(&mock_server, "/contact", html("<p>Write to us</p>")).await;
    mount_page(&mock_server, "/missing", ResponseTemplate::new(404)).await;

    let root = tempfile::tempdir().unwrap();
    let config = create_test_config(&base_url, &root);

    let result = Coordinator::new(config)
        .expect("Failed to create coordinator")
        .run()
        .await
        .expect("Archive failed");

    let mut crawled = result.crawled_pages.clone();
    crawled.sort();
    assert_eq!(
        crawled,
        vec![
            format!("{}/", base_url),
            format!("{}/about", base_url),
            format!("{}/contact", base_url),
        ]
    );

    assert_eq!(
        result.broken_links,
        vec![BrokenLink {
            url: format!("{}/missing", base_url),
            reason: FailureReason::NotFound,
        }]
    );

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.termination, Termination::FrontierExhausted);
    assert!(!result.completeness.is_complete);
    assert!(result.completeness.report.contains("/missing"));

    // Pages were rewritten to local paths
    let index = std::fs::read_to_string(result.archive_path.join("index.html")).unwrap();
    assert!(index.contains(r#"href="about/index.html""#), "{}", index);
    assert!(index.contains(r#"href="contact/index.html""#), "{}", index);
    let about = std::fs::read_to_string(result.archive_path.join("about/index.html")).unwrap();
    assert!(about.contains(&format!(r#"href="{}/missing""#, base_url)), "{}", about);

    let manifest = load_manifest(&result);
    assert_eq!(manifest.pages.len(), 4);

    let json: serde_json::Value = serde_json::from_str(
        &web_archive::output::result_json(&result).unwrap(),
    )
    .unwrap();
    assert_eq!(json["brokenLinks"][0]["reason"], "not_found");
}

#[tokio::test]
async fn test_same_origin_only() {
    let mock_server = MockServer::start().await;
    let other_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // The other server is on a different host name
    let other_port = url::Url::parse(&other_server.uri()).unwrap().port().unwrap();
    let offsite = format!("http://localhost:{}/page", other_port);

    mount_page(
        &mock_server,
        "/",
        html(format!(r#"<a href="{}">Elsewhere</a><a href="/local">Local</a>"#, offsite)),
    )
    .await;
    mount_page(&mock_server, "/local", html("<p>local</p>")).await;

    Mock::given(method("GET"))
        .respond_with(html("<p>should not be fetched</p>"))
        .expect(0)
        .mount(&other_server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let config = create_test_config(&base_url, &root);

    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(result.crawled_pages.len(), 2);
    assert!(result.broken_links.is_empty());
    assert!(result.completeness.is_complete, "{}", result.completeness.report);

    // Off-origin links keep pointing at the live site
    let index = std::fs::read_to_string(result.archive_path.join("index.html")).unwrap();
    assert!(index.contains(&format!(r#"href="{}""#, offsite)), "{}", index);
}

#[tokio::test]
async fn test_shared_asset_stored_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let page = r#"<html><head><link rel="stylesheet" href="/style.css"></head>
        <body><img src="/logo.png"><a href="/about">About</a></body></html>"#;
    mount_page(&mock_server, "/", html(page)).await;
    mount_page(&mock_server, "/about", html(page)).await;
    mount_page(
        &mock_server,
        "/style.css",
        ResponseTemplate::new(200)
            .set_body_raw(b"body { background: url(/logo.png); }".to_vec(), "text/css"),
    )
    .await;
    mount_page(
        &mock_server,
        "/logo.png",
        ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"),
    )
    .await;

    let root = tempfile::tempdir().unwrap();
    let config = create_test_config(&base_url, &root);
    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(result.crawled_pages.len(), 2);
    assert!(result.completeness.is_complete, "{}", result.completeness.report);

    let manifest = load_manifest(&result);
    assert_eq!(manifest.resources.len(), 2);
    let logo = manifest
        .resources
        .iter()
        .find(|r| r.url.as_str().ends_with("/logo.png"))
        .expect("logo recorded");
    assert!(logo.owners.len() >= 2, "{:?}", logo.owners);

    let stored: Vec<_> = std::fs::read_dir(result.archive_path.join("assets"))
        .unwrap()
        .collect();
    assert_eq!(stored.len(), 2);

    // Stylesheet references point at the stored copy
    let sheet = manifest
        .resources
        .iter()
        .find(|r| r.url.as_str().ends_with("/style.css"))
        .unwrap();
    let css = std::fs::read_to_string(result.archive_path.join(&sheet.local_path)).unwrap();
    let logo_name = logo.local_path.rsplit('/').next().unwrap();
    assert!(css.contains(logo_name), "{}", css);
    assert!(!css.contains("/logo.png"), "{}", css);
}

#[tokio::test]
async fn test_each_page_fetched_once_in_bfs_order() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Every page links to every other page
    let links = r#"<a href="/">0</a><a href="/a">A</a><a href="/b">B</a>
        <a href="/a/1">A1</a><a href="/b/1">B1</a>"#;
    mount_page(&mock_server, "/", html(r#"<a href="/a">A</a><a href="/b">B</a>"#)).await;
    mount_page(&mock_server, "/a", html(links)).await;
    mount_page(&mock_server, "/b", html(links)).await;
    mount_page(&mock_server, "/a/1", html(links)).await;
    mount_page(&mock_server, "/b/1", html(links)).await;

    let root = tempfile::tempdir().unwrap();
    let config = create_test_config(&base_url, &root);
    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    let manifest = load_manifest(&result);
    assert_eq!(manifest.pages.len(), 5);

    let depths: Vec<u32> = manifest.pages.iter().map(|p| p.depth).collect();
    assert_eq!(depths, vec![0, 1, 1, 2, 2]);
    let sequences: Vec<u64> = manifest.pages.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

    // Every page is either crawled or broken, never both
    let crawled: HashSet<&String> = result.crawled_pages.iter().collect();
    let broken: HashSet<&String> = result.broken_links.iter().map(|b| &b.url).collect();
    assert_eq!(crawled.len(), result.crawled_pages.len());
    assert!(crawled.is_disjoint(&broken));
    assert_eq!(crawled.len() + broken.len(), manifest.pages.len());
}

#[tokio::test]
async fn test_page_and_depth_limits() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        html(r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a>"#),
    )
    .await;
    mount_page(&mock_server, "/a", html(r#"<a href="/a/deep">Deep</a>"#)).await;
    Mock::given(method("GET"))
        .respond_with(html("<p>leaf</p>"))
        .mount(&mock_server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&base_url, &root);
    config.crawler.max_depth = 1;
    config.crawler.max_pages = 3;
    config.crawler.max_concurrent_fetches = 1;

    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(result.crawled_pages.len(), 3);
    assert_eq!(result.termination, Termination::PageLimit);
    assert_eq!(result.status, RunStatus::Success);
}

#[tokio::test]
async fn test_judgment_service_verdict() {
    let mock_server = MockServer::start().await;
    let judge_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/", html("<p>home</p>")).await;
    Mock::given(method("POST"))
        .and(path("/judge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "completenessReport": "Looks complete",
            "isComplete": true
        })))
        .expect(1)
        .mount(&judge_server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&base_url, &root);
    config.assessment.strategy = AssessmentStrategy::Judgment;
    config.assessment.judgment_endpoint = Some(format!("{}/judge", judge_server.uri()));

    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert!(result.completeness.is_complete);
    assert_eq!(result.completeness.report, "Looks complete");
}

#[tokio::test]
async fn test_judgment_timeout_does_not_fail_run() {
    let mock_server = MockServer::start().await;
    let judge_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/", html("<p>home</p>")).await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "completenessReport": "Too late",
                    "isComplete": true
                }))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&judge_server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&base_url, &root);
    config.assessment.strategy = AssessmentStrategy::Judgment;
    config.assessment.judgment_endpoint = Some(judge_server.uri());
    config.assessment.judgment_timeout_ms = 200;

    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.crawled_pages.len(), 1);
    assert!(!result.completeness.is_complete);
    assert!(result.completeness.report.contains("timed out"), "{}", result.completeness.report);
}

#[tokio::test]
async fn test_report_and_manifest_written() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/", html(r#"<a href="/gone">Gone</a>"#)).await;
    mount_page(&mock_server, "/gone", ResponseTemplate::new(500)).await;

    let root = tempfile::tempdir().unwrap();
    let config = create_test_config(&base_url, &root);
    let result = Coordinator::new(config).unwrap().run().await.unwrap();

    assert!(result.manifest_path.starts_with(&result.archive_path));
    let manifest = load_manifest(&result);
    assert_eq!(manifest.run.seed_url, format!("{}/", base_url));
    assert_eq!(
        manifest.pages[1].failure_reason(),
        Some(FailureReason::ServerError)
    );

    let report = std::fs::read_to_string(result.archive_path.join("report.md")).unwrap();
    assert!(report.contains("/gone"), "{}", report);
}
