//! Integration tests over real HTTP
//!
//! These tests use wiremock to serve a small site and clone it with the
//! default HTTP renderer, including robots.txt and sitemap discovery.

use sumi_mirror::config::{Config, JobOptions};
use sumi_mirror::crawler::Orchestrator;
use sumi_mirror::output::{load_statistics, StatsSource};
use sumi_mirror::state::JobPhase;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn http_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output.directory = dir.path().to_path_buf();
    config.pool.min_size = 0;
    config.retry.max_retries = 0;
    config.retry.initial_delay_ms = 1;
    config.render.navigation_timeout_ms = 5_000;
    config
}

#[tokio::test]
async fn test_clone_with_robots_and_sitemap() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>{}/from-sitemap</loc><priority>0.9</priority></url>
            </urlset>"#,
            base
        )))
        .mount(&server)
        .await;
    mount_html(
        &server,
        "/",
        r#"<html><body><a href="/about">About</a><a href="/private">Secret</a></body></html>"#
            .to_string(),
    )
    .await;
    mount_html(&server, "/about", "<p>about</p>".to_string()).await;
    mount_html(&server, "/from-sitemap", "<p>listed</p>".to_string()).await;
    mount_html(&server, "/private", "<p>secret</p>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let mut config = http_config(&dir);
    config.output.capture_assets = false;
    config.discovery.sitemap = true;
    config.discovery.respect_robots = true;

    let summary = Orchestrator::new(config, &format!("{}/", base))
        .unwrap()
        .with_options(JobOptions {
            use_cache: Some(false),
            ..Default::default()
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.phase, JobPhase::Completed);
    assert_eq!(summary.pages_cloned, 3);
    assert!(summary
        .completed_urls
        .contains(&format!("{}/from-sitemap", base)));
    assert!(!summary
        .completed_urls
        .iter()
        .any(|u| u.ends_with("/private")));

    let stats = load_statistics(dir.path()).await.unwrap().unwrap();
    assert_eq!(stats.source, StatsSource::Manifest);
    assert_eq!(stats.pages_cloned, 3);
}

#[tokio::test]
async fn test_assets_are_captured_and_linked() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/",
        r#"<html><head><link rel="stylesheet" href="/site.css"></head>
        <body><img src="/logo.png"><a href="/about">About</a></body></html>"#
            .to_string(),
    )
    .await;
    mount_html(
        &server,
        "/about",
        r#"<html><head><link rel="stylesheet" href="/site.css"></head></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body { color: black; }"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = http_config(&dir);
    config.discovery.sitemap = false;

    let summary = Orchestrator::new(config, &format!("{}/", base))
        .unwrap()
        .with_options(JobOptions {
            use_cache: Some(false),
            concurrency: Some(1),
            ..Default::default()
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_cloned, 2);
    // The stylesheet is shared and only downloaded once
    assert_eq!(summary.assets_captured, 2);

    let pages: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != "_assets" && e.path().is_dir())
        .collect();
    assert_eq!(pages.len(), 1);
    let index = std::fs::read_to_string(pages[0].path().join("index.html")).unwrap();
    assert!(index.contains("_assets/"));
    assert!(!index.contains(r#"href="/site.css""#));
}
