//! Integration tests for the clone pipeline
//!
//! These tests drive the orchestrator end-to-end against an in-memory site
//! served by a fake renderer, so every run is deterministic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_mirror::cache::{
    CacheEntry, ChangeDetector, ChangeReason, ChangeReport, PageCache, SqliteCache,
};
use sumi_mirror::checkpoint::CheckpointStore;
use sumi_mirror::config::{Config, JobOptions};
use sumi_mirror::crawler::{Orchestrator, ResumeMode, StopReason};
use sumi_mirror::output::read_manifest;
use sumi_mirror::render::{Navigation, RenderConfig, Renderer, RendererFactory, WaitStrategy};
use sumi_mirror::state::JobPhase;
use sumi_mirror::url::page_path;
use sumi_mirror::{MirrorError, PageError};
use tempfile::TempDir;
use url::Url;

/// A site whose pages are HTML snippets keyed by URL
struct Site {
    pages: HashMap<String, String>,
    navigations: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl Site {
    fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Self::with_delay(pages, Duration::ZERO)
    }

    fn with_delay(pages: &[(&str, &str)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(u, html)| (u.to_string(), html.to_string()))
                .collect(),
            navigations: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        })
    }

    fn navigations_to(&self, url: &str) -> usize {
        self.navigations
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    fn total_navigations(&self) -> usize {
        self.navigations.lock().unwrap().values().sum()
    }
}

struct SiteRenderer {
    site: Arc<Site>,
    current: Option<(Url, String)>,
}

#[async_trait]
impl Renderer for SiteRenderer {
    async fn navigate(
        &mut self,
        url: &Url,
        _wait: WaitStrategy,
        _timeout: Duration,
    ) -> Result<Navigation, PageError> {
        *self
            .site
            .navigations
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        let now = self.site.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.site.delay.is_zero() {
            tokio::time::sleep(self.site.delay).await;
        }
        self.site.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (status, html) = match self.site.pages.get(url.as_str()) {
            Some(html) => (200, html.clone()),
            None => (404, String::new()),
        };
        self.current = Some((url.clone(), html.clone()));
        Ok(Navigation {
            html,
            status,
            final_url: url.to_string(),
            etag: None,
            last_modified: None,
        })
    }

    async fn extract_links(&mut self) -> Result<Vec<String>, PageError> {
        let (base, html) = self
            .current
            .as_ref()
            .ok_or(PageError::Unsupported("links"))?;
        Ok(sumi_mirror::crawler::extract_links(html, base)
            .into_iter()
            .map(String::from)
            .collect())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        Err(PageError::Unsupported("screenshots"))
    }

    async fn close(&mut self) {}
}

struct SiteFactory(Arc<Site>);

#[async_trait]
impl RendererFactory for SiteFactory {
    async fn create(&self, _config: &RenderConfig) -> Result<Box<dyn Renderer>, PageError> {
        Ok(Box::new(SiteRenderer {
            site: Arc::clone(&self.0),
            current: None,
        }))
    }
}

/// Config for an offline run: no discovery, no assets, fast retries
fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output.directory = dir.path().to_path_buf();
    config.output.capture_assets = false;
    config.discovery.sitemap = false;
    config.discovery.respect_robots = false;
    config.pool.min_size = 0;
    config.retry.max_retries = 1;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 1;
    config.retry.jitter = 0.0;
    config
}

fn no_cache(options: JobOptions) -> JobOptions {
    JobOptions {
        use_cache: Some(false),
        ..options
    }
}

fn orchestrator(config: Config, site: &Arc<Site>, options: JobOptions) -> Orchestrator {
    Orchestrator::new(config, "https://x.com/")
        .unwrap()
        .with_renderer_factory(Arc::new(SiteFactory(Arc::clone(site))))
        .with_options(no_cache(options))
}

/// Root links to four pages which each link one level deeper
fn wide_site() -> Arc<Site> {
    Site::new(&[
        (
            "https://x.com/",
            r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a><a href="/d">D</a>"#,
        ),
        ("https://x.com/a", r#"<a href="/a/deep">deeper</a>"#),
        ("https://x.com/b", r#"<a href="/b/deep">deeper</a>"#),
        ("https://x.com/c", "<p>c</p>"),
        ("https://x.com/d", "<p>d</p>"),
        ("https://x.com/a/deep", "<p>a deep</p>"),
        ("https://x.com/b/deep", "<p>b deep</p>"),
    ])
}

#[tokio::test]
async fn test_page_budget_stops_and_keeps_checkpoint() {
    let dir = TempDir::new().unwrap();
    let site = wide_site();

    let summary = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            max_pages: Some(3),
            max_depth: Some(1),
            concurrency: Some(2),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.pages_cloned, 3);
    assert_eq!(summary.stop_reason, StopReason::PageBudget);
    assert_eq!(summary.phase, JobPhase::Completed);
    assert!(summary.pages_pending > 0);
    assert_eq!(site.total_navigations(), 3);

    let loaded = CheckpointStore::load(dir.path()).await;
    assert!(loaded.can_resume);
    let checkpoint = loaded.checkpoint.unwrap();
    assert_eq!(checkpoint.completed_urls.len(), 3);
    assert!(!checkpoint.pending_urls.is_empty());
    assert!(dir.path().join("x.com/index.html").exists());
}

#[tokio::test]
async fn test_resume_never_refetches_completed_pages() {
    let dir = TempDir::new().unwrap();
    let site = wide_site();

    let first = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            max_pages: Some(2),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();
    assert_eq!(first.pages_cloned, 2);
    assert!(!first.resumed);

    let second = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            max_pages: Some(100),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert!(second.resumed);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.stop_reason, StopReason::FrontierExhausted);
    assert_eq!(second.pages_cloned, 7);
    for url in &second.completed_urls {
        assert_eq!(site.navigations_to(url), 1, "{} fetched twice", url);
    }
    // A finished job leaves no checkpoint behind
    assert!(!CheckpointStore::primary_path(dir.path()).exists());
}

#[tokio::test]
async fn test_fresh_mode_discards_checkpoint() {
    let dir = TempDir::new().unwrap();
    let site = wide_site();
    let limited = JobOptions {
        max_pages: Some(2),
        ..Default::default()
    };

    let first = orchestrator(test_config(&dir), &site, limited.clone())
        .run()
        .await
        .unwrap();
    let second = orchestrator(test_config(&dir), &site, limited)
        .with_resume_mode(ResumeMode::Fresh)
        .run()
        .await
        .unwrap();

    assert!(!second.resumed);
    assert_ne!(second.job_id, first.job_id);
    assert_eq!(site.navigations_to("https://x.com/"), 2);
}

#[tokio::test]
async fn test_cache_hit_skips_renderer() {
    let dir = TempDir::new().unwrap();
    let site = Site::new(&[]);
    let cache = SqliteCache::open_in_memory().unwrap();
    cache
        .put(&CacheEntry::new(
            "https://x.com/",
            "<p>from cache</p>",
            Duration::from_secs(600),
        ))
        .unwrap();

    let summary = Orchestrator::new(test_config(&dir), "https://x.com/")
        .unwrap()
        .with_renderer_factory(Arc::new(SiteFactory(Arc::clone(&site))))
        .with_cache(Arc::new(cache) as Arc<dyn PageCache>)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_cloned, 1);
    assert_eq!(summary.pages_cached, 1);
    assert_eq!(site.total_navigations(), 0);
    let html = std::fs::read_to_string(dir.path().join("x.com/index.html")).unwrap();
    assert!(html.contains("from cache"));
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let links: String = (0..8)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    let mut pages = vec![("https://x.com/".to_string(), links)];
    for i in 0..8 {
        pages.push((format!("https://x.com/p{}", i), "<p>leaf</p>".to_string()));
    }
    let pages: Vec<(&str, &str)> = pages
        .iter()
        .map(|(u, h)| (u.as_str(), h.as_str()))
        .collect();
    let site = Site::with_delay(&pages, Duration::from_millis(20));

    let summary = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            concurrency: Some(3),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.pages_cloned, 9);
    let peak = site.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "{} pages rendered at once", peak);
}

#[tokio::test]
async fn test_fragments_name_one_page() {
    let dir = TempDir::new().unwrap();
    let site = Site::new(&[
        (
            "https://x.com/",
            r##"<a href="/a#intro">Intro</a><a href="/a#usage">Usage</a><a href="/a">A</a>"##,
        ),
        ("https://x.com/a", "<p>a</p>"),
    ]);

    let summary = orchestrator(test_config(&dir), &site, JobOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_cloned, 2);
    assert_eq!(site.navigations_to("https://x.com/a"), 1);

    // Links are rewritten to the local copy and keep their fragment
    let root = std::fs::read_to_string(dir.path().join("x.com/index.html")).unwrap();
    assert!(root.contains(r##"href="a/index.html#intro""##));
    assert!(root.contains(r#"href="a/index.html""#));
    assert!(summary.links_rewritten >= 3);
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let dir = TempDir::new().unwrap();
    let site = Site::new(&[
        (
            "https://x.com/",
            r#"<a href="/ok">ok</a><a href="/missing">missing</a>"#,
        ),
        ("https://x.com/ok", "<p>ok</p>"),
    ]);

    let summary = orchestrator(test_config(&dir), &site, JobOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.phase, JobPhase::Completed);
    assert_eq!(summary.pages_cloned, 2);
    assert_eq!(summary.pages_failed, 1);

    let manifest = read_manifest(dir.path()).await.unwrap().unwrap();
    assert_eq!(manifest.phase, JobPhase::Completed);
    assert_eq!(manifest.pages.len(), 2);
    assert_eq!(manifest.failures.len(), 1);
    assert_eq!(manifest.failures[0].url, "https://x.com/missing");
    assert!(manifest.failures[0].permanent);
}

#[tokio::test]
async fn test_unreachable_root_clones_nothing() {
    let dir = TempDir::new().unwrap();
    let site = Site::new(&[]);

    let err = orchestrator(test_config(&dir), &site, JobOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::NoPagesCloned { failed: 1, .. }));
}

#[tokio::test]
async fn test_distributed_workers_clone_site() {
    let dir = TempDir::new().unwrap();
    let site = wide_site();
    let mut config = test_config(&dir);
    config.distributed.enabled = true;
    config.distributed.workers = 2;
    config.distributed.worker_capacity = 1;

    let summary = orchestrator(config, &site, JobOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_cloned, 7);
    assert_eq!(summary.pages_failed, 0);
    assert!(site.max_in_flight.load(Ordering::SeqCst) <= 2);
}

/// Copies the checkpoint aside as soon as `trigger` starts rendering, which is
/// what a crash at that moment would leave on disk
struct CheckpointCopier {
    site: Arc<Site>,
    trigger: String,
    from: PathBuf,
    to: PathBuf,
}

struct CopyingRenderer {
    inner: SiteRenderer,
    trigger: String,
    from: PathBuf,
    to: PathBuf,
}

#[async_trait]
impl Renderer for CopyingRenderer {
    async fn navigate(
        &mut self,
        url: &Url,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<Navigation, PageError> {
        if url.as_str() == self.trigger {
            std::fs::copy(&self.from, &self.to).unwrap();
        }
        self.inner.navigate(url, wait, timeout).await
    }

    async fn extract_links(&mut self) -> Result<Vec<String>, PageError> {
        self.inner.extract_links().await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        self.inner.screenshot().await
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl RendererFactory for CheckpointCopier {
    async fn create(&self, _config: &RenderConfig) -> Result<Box<dyn Renderer>, PageError> {
        Ok(Box::new(CopyingRenderer {
            inner: SiteRenderer {
                site: Arc::clone(&self.site),
                current: None,
            },
            trigger: self.trigger.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        }))
    }
}

#[tokio::test]
async fn test_links_survive_a_crash_after_their_parent_is_saved() {
    let site = Site::new(&[
        ("https://x.com/", r#"<a href="/a">A</a><a href="/b">B</a>"#),
        ("https://x.com/a", r#"<a href="/a1">A1</a>"#),
        ("https://x.com/b", r#"<a href="/b1">B1</a>"#),
        ("https://x.com/a1", "<p>a1</p>"),
        ("https://x.com/b1", "<p>b1</p>"),
    ]);
    let dir = TempDir::new().unwrap();
    let crashed = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.checkpoint.save_every = 1;

    Orchestrator::new(config, "https://x.com/")
        .unwrap()
        .with_renderer_factory(Arc::new(CheckpointCopier {
            site: Arc::clone(&site),
            trigger: "https://x.com/a".to_string(),
            from: CheckpointStore::primary_path(dir.path()),
            to: CheckpointStore::primary_path(crashed.path()),
        }))
        .with_options(no_cache(JobOptions {
            concurrency: Some(1),
            ..Default::default()
        }))
        .run()
        .await
        .unwrap();

    let fresh_site = Site::new(&[
        ("https://x.com/a", r#"<a href="/a1">A1</a>"#),
        ("https://x.com/b", r#"<a href="/b1">B1</a>"#),
        ("https://x.com/a1", "<p>a1</p>"),
        ("https://x.com/b1", "<p>b1</p>"),
    ]);
    let resumed = orchestrator(
        test_config(&crashed),
        &fresh_site,
        JobOptions {
            concurrency: Some(1),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert!(resumed.resumed);
    assert_eq!(fresh_site.navigations_to("https://x.com/"), 0);
    let mut completed = resumed.completed_urls.clone();
    completed.sort();
    assert_eq!(
        completed,
        vec![
            "https://x.com/",
            "https://x.com/a",
            "https://x.com/a1",
            "https://x.com/b",
            "https://x.com/b1",
        ]
    );
}

#[tokio::test]
async fn test_overlong_path_segment_does_not_abort_the_clone() {
    let dir = TempDir::new().unwrap();
    let long = format!("https://x.com/{}", "a".repeat(300));
    let root = format!(r#"<a href="/{}">long</a><a href="/ok">ok</a>"#, "a".repeat(300));
    let site = Site::new(&[
        ("https://x.com/", root.as_str()),
        (long.as_str(), "<p>long</p>"),
        ("https://x.com/ok", "<p>ok</p>"),
    ]);

    let summary = orchestrator(test_config(&dir), &site, JobOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.phase, JobPhase::Completed);
    assert_eq!(summary.pages_cloned, 3);
    assert_eq!(summary.pages_failed, 0);
    let saved = dir.path().join(page_path(&Url::parse(&long).unwrap()));
    assert!(saved.exists());
}

#[tokio::test]
async fn test_time_budget_stops_and_keeps_checkpoint() {
    let dir = TempDir::new().unwrap();
    let site = Site::with_delay(
        &[
            (
                "https://x.com/",
                r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a><a href="/d">D</a>"#,
            ),
            ("https://x.com/a", "<p>a</p>"),
            ("https://x.com/b", "<p>b</p>"),
            ("https://x.com/c", "<p>c</p>"),
            ("https://x.com/d", "<p>d</p>"),
        ],
        Duration::from_millis(150),
    );

    let summary = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            concurrency: Some(1),
            ..Default::default()
        },
    )
    .with_time_limit(Duration::from_millis(200))
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stop_reason, StopReason::TimeBudget);
    assert_eq!(summary.phase, JobPhase::TimeLimitReached);
    assert!(summary.pages_cloned >= 1 && summary.pages_cloned < 5);
    assert!(summary.pages_pending > 0);

    let loaded = CheckpointStore::load(dir.path()).await;
    assert!(loaded.can_resume);
    let manifest = read_manifest(dir.path()).await.unwrap().unwrap();
    assert_eq!(manifest.phase, JobPhase::TimeLimitReached);
}

/// Reports every page unchanged and counts the checks
struct Unchanged(AtomicUsize);

#[async_trait]
impl ChangeDetector for Unchanged {
    async fn detect_change(&self, _url: &str) -> ChangeReport {
        self.0.fetch_add(1, Ordering::SeqCst);
        ChangeReport::unchanged(ChangeReason::NotModified)
    }
}

#[tokio::test]
async fn test_incremental_reuses_expired_entry_when_unchanged() {
    let dir = TempDir::new().unwrap();
    let site = Site::new(&[("https://x.com/", "<p>live</p>")]);
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    cache
        .put(&CacheEntry::new(
            "https://x.com/",
            "<p>from cache</p>",
            Duration::ZERO,
        ))
        .unwrap();
    assert!(cache.get("https://x.com/").unwrap().is_none());
    let detector = Arc::new(Unchanged(AtomicUsize::new(0)));

    let summary = Orchestrator::new(test_config(&dir), "https://x.com/")
        .unwrap()
        .with_renderer_factory(Arc::new(SiteFactory(Arc::clone(&site))))
        .with_cache(cache.clone() as Arc<dyn PageCache>)
        .with_change_detector(detector.clone() as Arc<dyn ChangeDetector>)
        .with_options(JobOptions {
            incremental: Some(true),
            ..Default::default()
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_cached, 1);
    assert_eq!(site.total_navigations(), 0);
    assert_eq!(detector.0.load(Ordering::SeqCst), 1);
    // The TTL restarted, so a plain lookup hits again
    assert!(cache.get("https://x.com/").unwrap().is_some());
    let html = std::fs::read_to_string(dir.path().join("x.com/index.html")).unwrap();
    assert!(html.contains("from cache"));
}

#[tokio::test]
async fn test_unlimited_lifts_page_and_depth_budgets() {
    let dir = TempDir::new().unwrap();
    let site = wide_site();

    let summary = orchestrator(
        test_config(&dir),
        &site,
        JobOptions {
            max_pages: Some(1),
            max_depth: Some(0),
            unlimited: Some(true),
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stop_reason, StopReason::FrontierExhausted);
    assert_eq!(summary.pages_cloned, 7);
    assert!(summary.completed_urls.contains(&"https://x.com/a/deep".to_string()));
}
