//! Clone job orchestration
//!
//! The [`Orchestrator`] owns one clone job from start to finish. It walks the
//! phase machine `Initializing → Discovering → Crawling → LinkFixing →
//! Verifying → Exporting` and ends in `Completed`, `TimeLimitReached` or
//! `Failed`. Page tasks run in parallel through a [`Dispatcher`], but their
//! outcomes are applied to the scheduler and the checkpoint here, one at a
//! time, so the checkpoint has a single writer.

use crate::assets::{AssetCollector, AssetDeduplicator, AssetFetcher, HttpAssetFetcher};
use crate::cache::{ChangeDetector, HttpChangeDetector, PageCache, SqliteCache};
use crate::checkpoint::{Checkpoint, CheckpointStore, DownloadedAsset};
use crate::config::{validate, validate_root_url, Config, JobOptions, ResolvedOptions};
use crate::crawler::discovery::discover;
use crate::crawler::executor::{Dispatcher, LocalExecutor};
use crate::crawler::link_fixer::{fix_links, LinkMap};
use crate::crawler::page_task::{PageContext, PageOutcome};
use crate::crawler::progress::{ProgressSender, ProgressStatus};
use crate::crawler::scheduler::{
    decayed_priority, CrawlScheduler, SchedulerLimits, StopReason, LINK_PRIORITY, ROOT_PRIORITY,
    SITEMAP_DEFAULT_PRIORITY,
};
use crate::distributed::DistributedExecutor;
use crate::output::{write_manifest, CloneManifest};
use crate::render::{
    build_http_client, HttpRendererFactory, RenderConfig, RenderPool, RenderPoolConfig,
    RendererFactory, DEFAULT_USER_AGENT,
};
use crate::retry::{RetryCoordinator, RetryPolicy};
use crate::state::{JobPhase, PageStatus};
use crate::url::{normalize_url, page_path};
use crate::{ConfigError, MirrorError, PageError, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// What to do with a checkpoint found in the output directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Resume if the checkpoint is usable, otherwise start over (and say so)
    #[default]
    Auto,

    /// Discard any checkpoint and start over
    Fresh,

    /// Fail the job unless the checkpoint can be resumed
    Require,
}

/// Result of a finished clone job
#[derive(Debug, Clone, PartialEq)]
pub struct CloneSummary {
    pub job_id: String,
    pub root_url: String,
    pub output_dir: PathBuf,
    pub phase: JobPhase,
    pub stop_reason: StopReason,
    pub resumed: bool,
    /// Set when a checkpoint existed but was not (fully) used
    pub resume_note: Option<String>,
    /// Pages cloned over the whole job, including earlier runs
    pub pages_cloned: usize,
    /// Pages served from the cache in this run
    pub pages_cached: usize,
    pub pages_failed: usize,
    pub pages_pending: usize,
    pub assets_captured: usize,
    pub bytes_downloaded: u64,
    pub links_rewritten: usize,
    /// Completed pages whose file is missing from the output tree
    pub missing_files: Vec<String>,
    pub completed_urls: Vec<String>,
    pub manifest_path: PathBuf,
    pub elapsed: Duration,
}

/// Per-run state created while initializing
struct Job {
    store: CheckpointStore,
    scheduler: CrawlScheduler,
    resolved: ResolvedOptions,
    resumed: bool,
    resume_note: Option<String>,
    dedup: Arc<AssetDeduplicator>,
    known_assets: Vec<(String, PathBuf)>,
    pages_cached: usize,
}

/// Drives one clone job
///
/// Collaborators (renderer factory, cache, change detector, asset fetcher,
/// dispatcher) are injected through the `with_*` methods; anything not
/// injected is built from the [`Config`].
pub struct Orchestrator {
    config: Config,
    root: Url,
    overrides: JobOptions,
    resume: ResumeMode,
    factory: Arc<dyn RendererFactory>,
    cache: Option<Arc<dyn PageCache>>,
    change_detector: Option<Arc<dyn ChangeDetector>>,
    asset_fetcher: Option<Arc<dyn AssetFetcher>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    progress: ProgressSender,
    config_hash: Option<String>,
    time_limit: Option<Duration>,
    phase: JobPhase,
    started: Instant,
    pages_done: usize,
    pages_total: usize,
    assets_captured: usize,
}

impl Orchestrator {
    /// Creates an orchestrator for cloning `root_url`
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before use
    /// * `root_url` - Absolute http(s) URL; normalized before use
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to [`run`](Self::run)
    /// * `Err(MirrorError)` - The configuration or URL is invalid
    pub fn new(config: Config, root_url: &str) -> Result<Self> {
        validate(&config)?;
        validate_root_url(root_url)?;
        let root = normalize_url(root_url)?;

        Ok(Self {
            config,
            root,
            overrides: JobOptions::default(),
            resume: ResumeMode::Auto,
            factory: Arc::new(HttpRendererFactory),
            cache: None,
            change_detector: None,
            asset_fetcher: None,
            dispatcher: None,
            progress: ProgressSender::disabled(),
            config_hash: None,
            time_limit: None,
            phase: JobPhase::Initializing,
            started: Instant::now(),
            pages_done: 0,
            pages_total: 0,
            assets_captured: 0,
        })
    }

    /// Creates an orchestrator for the root URL named in the config
    pub fn from_config(config: Config) -> Result<Self> {
        let root = config
            .url
            .clone()
            .ok_or_else(|| ConfigError::Validation("no root URL configured".to_string()))?;
        Self::new(config, &root)
    }

    /// Job options overlaid on the `[job]` section (and on a resumed
    /// checkpoint's stored options)
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.overrides = options;
        self
    }

    pub fn with_resume_mode(mut self, mode: ResumeMode) -> Self {
        self.resume = mode;
        self
    }

    pub fn with_renderer_factory(mut self, factory: Arc<dyn RendererFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Uses `cache` instead of opening the configured SQLite file
    pub fn with_cache(mut self, cache: Arc<dyn PageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_change_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.change_detector = Some(detector);
        self
    }

    pub fn with_asset_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.asset_fetcher = Some(fetcher);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    /// Hash of the config file, recorded in the checkpoint for diagnostics
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Caps the crawl at `limit`, taking precedence over `time_limit_minutes`
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Runs the job to a terminal phase
    ///
    /// # Returns
    ///
    /// * `Ok(CloneSummary)` - The job ended `Completed` or `TimeLimitReached`
    /// * `Err(MirrorError::NoPagesCloned)` - Not a single page could be cloned
    /// * `Err(MirrorError)` - A job-fatal error (e.g. unwritable output directory)
    pub async fn run(mut self) -> Result<CloneSummary> {
        self.started = Instant::now();
        let pool = RenderPool::new(
            RenderPoolConfig::from(&self.config.pool),
            Arc::clone(&self.factory),
        );

        let result = self.execute(&pool).await;
        pool.close_all().await;

        if let Err(e) = &result {
            error!("Clone of {} failed: {}", self.root, e);
            if !self.phase.is_terminal() {
                self.phase = JobPhase::Failed;
                self.emit_phase();
            }
        }
        result
    }

    async fn execute(&mut self, pool: &RenderPool) -> Result<CloneSummary> {
        self.emit_phase();
        info!("Cloning {}", self.root);

        let output_dir = self.config.output.directory.clone();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| MirrorError::CheckpointUnwritable {
                path: output_dir.display().to_string(),
                source,
            })?;

        let mut job = self.open_job(&output_dir).await?;
        if self.config_hash.is_some() {
            job.store.set_config_hash(self.config_hash.clone()).await;
        }

        let render_config = RenderConfig::from(&self.config.render);
        let navigation_timeout = Duration::from_millis(self.config.render.navigation_timeout_ms);
        let client = build_http_client(&render_config)?;

        if job.resumed {
            // Restored pending URLs were filtered when first enqueued
            job.scheduler.enqueue(self.root.as_str(), 0, ROOT_PRIORITY);
        } else if self.config.discovery.sitemap || self.config.discovery.respect_robots {
            self.transition(JobPhase::Discovering)?;
            self.seed_from_discovery(&client, &render_config, navigation_timeout, &mut job)
                .await;
        } else {
            job.scheduler.enqueue(self.root.as_str(), 0, ROOT_PRIORITY);
        }

        let ctx = Arc::new(self.page_context(
            &job,
            &output_dir,
            pool,
            &client,
            render_config.clone(),
            navigation_timeout,
        ));

        self.transition(JobPhase::Crawling)?;
        if let Err(e) = pool.start(&render_config).await {
            warn!("Render pool could not pre-warm: {}", e);
        }
        let stop = self.crawl(&mut job, ctx, pool).await?;

        job.store.set_pending(job.scheduler.snapshot()).await;
        let snapshot = job.store.snapshot().await;
        if snapshot.completed_urls.is_empty() {
            job.store.save().await?;
            return Err(MirrorError::NoPagesCloned {
                root: self.root.to_string(),
                failed: snapshot.failed_urls.len(),
            });
        }

        self.transition(JobPhase::LinkFixing)?;
        let pages = cloned_pages(&snapshot);
        let mut map = LinkMap::new();
        for (url, path) in &pages {
            map.insert(url.as_str(), path.clone());
        }
        for asset in &snapshot.downloaded_assets {
            map.insert(asset.url.clone(), asset.local_path.clone());
        }
        let fixed = fix_links(&output_dir, &pages, &map).await?;

        self.transition(JobPhase::Verifying)?;
        let missing_files: Vec<String> = pages
            .iter()
            .filter(|(_, path)| !output_dir.join(path).is_file())
            .map(|(url, _)| url.to_string())
            .collect();
        if !missing_files.is_empty() {
            warn!(
                "{} cloned page(s) are missing from {}",
                missing_files.len(),
                output_dir.display()
            );
        }

        self.transition(JobPhase::Exporting)?;
        let terminal = match stop {
            StopReason::TimeBudget => JobPhase::TimeLimitReached,
            StopReason::FrontierExhausted | StopReason::PageBudget => JobPhase::Completed,
        };
        let dedup = Arc::clone(&job.dedup);
        let manifest = CloneManifest::from_checkpoint(
            &snapshot,
            terminal,
            missing_files.clone(),
            |hash| dedup.references(hash),
            dedup.bytes_saved(),
        );
        let manifest_path = write_manifest(&output_dir, &manifest).await?;

        // Budget stops keep the checkpoint so a larger budget can continue
        if stop == StopReason::FrontierExhausted {
            job.store.mark_job_completed().await?;
        } else {
            job.store.save().await?;
        }
        self.transition(terminal)?;

        let summary = CloneSummary {
            job_id: snapshot.job_id.clone(),
            root_url: snapshot.root_url.clone(),
            output_dir,
            phase: terminal,
            stop_reason: stop,
            resumed: job.resumed,
            resume_note: job.resume_note.clone(),
            pages_cloned: snapshot.completed_urls.len(),
            pages_cached: job.pages_cached,
            pages_failed: snapshot.failed_urls.len(),
            pages_pending: snapshot.pending_urls.len(),
            assets_captured: snapshot.assets_captured,
            bytes_downloaded: snapshot.bytes_downloaded,
            links_rewritten: fixed.links_rewritten,
            missing_files,
            completed_urls: snapshot.completed_urls.iter().cloned().collect(),
            manifest_path,
            elapsed: self.started.elapsed(),
        };

        info!(
            "Clone {} finished as {}: {} page(s) cloned, {} failed, {} pending",
            summary.job_id,
            summary.phase.as_str(),
            summary.pages_cloned,
            summary.pages_failed,
            summary.pages_pending
        );
        Ok(summary)
    }

    /// Loads a resumable checkpoint or initializes a fresh one
    async fn open_job(&mut self, output_dir: &Path) -> Result<Job> {
        let save_every = self.config.checkpoint.save_every;

        let mut resume_note = None;
        let loaded = match self.resume {
            ResumeMode::Fresh => {
                remove_checkpoint(output_dir).await?;
                None
            }
            ResumeMode::Auto | ResumeMode::Require => {
                let result = CheckpointStore::load(output_dir).await;
                let refusal = match (&result.checkpoint, result.can_resume) {
                    (Some(cp), true) if cp.root_url == self.root.as_str() => None,
                    (Some(cp), true) => Some(format!("checkpoint belongs to {}", cp.root_url)),
                    _ => Some(
                        result
                            .reason
                            .clone()
                            .unwrap_or_else(|| "checkpoint unusable".to_string()),
                    ),
                };

                match refusal {
                    None => {
                        resume_note = result.reason.clone();
                        result.checkpoint
                    }
                    Some(reason) if self.resume == ResumeMode::Require => {
                        return Err(MirrorError::Checkpoint(format!(
                            "cannot resume from {}: {}",
                            output_dir.display(),
                            reason
                        )));
                    }
                    Some(reason) => {
                        let existed = result.checkpoint.is_some()
                            || CheckpointStore::primary_path(output_dir).exists();
                        if existed {
                            warn!("Not resuming ({}); starting a fresh clone", reason);
                            resume_note = Some(reason);
                        } else {
                            debug!("No checkpoint in {}", output_dir.display());
                        }
                        None
                    }
                }
            }
        };

        match loaded {
            Some(checkpoint) => {
                self.resume_job(output_dir, checkpoint, save_every, resume_note)
                    .await
            }
            None => self.fresh_job(output_dir, save_every, resume_note).await,
        }
    }

    fn resolve(&self, options: &JobOptions) -> ResolvedOptions {
        let mut resolved = options.resolve();
        if self.time_limit.is_some() {
            resolved.time_limit = self.time_limit;
        }
        resolved
    }

    async fn fresh_job(
        &mut self,
        output_dir: &Path,
        save_every: usize,
        resume_note: Option<String>,
    ) -> Result<Job> {
        let options = self.config.job.merge(&self.overrides);
        let resolved = self.resolve(&options);
        let store =
            CheckpointStore::initialize(output_dir, self.root.as_str(), options, save_every).await?;

        let scheduler = CrawlScheduler::new(self.root.clone(), SchedulerLimits::from(&resolved))
            .with_start(self.started);

        Ok(Job {
            store,
            scheduler,
            resolved,
            resumed: false,
            resume_note,
            dedup: Arc::new(AssetDeduplicator::new(output_dir)),
            known_assets: Vec::new(),
            pages_cached: 0,
        })
    }

    async fn resume_job(
        &mut self,
        output_dir: &Path,
        mut checkpoint: Checkpoint,
        save_every: usize,
        resume_note: Option<String>,
    ) -> Result<Job> {
        checkpoint.options = checkpoint.options.merge(&self.overrides);
        let resolved = self.resolve(&checkpoint.options);

        let requeued: Vec<(String, u32)> = checkpoint
            .failed_urls
            .iter()
            .filter(|(_, failure)| !failure.permanent)
            .map(|(url, failure)| (url.clone(), failure.depth))
            .collect();
        checkpoint.requeue_transient_failures();

        let mut scheduler =
            CrawlScheduler::new(self.root.clone(), SchedulerLimits::from(&resolved))
                .with_start(self.started);
        scheduler.restore_completed(checkpoint.completed_urls.iter().cloned());
        scheduler.restore_failed(checkpoint.failed_urls.keys().cloned());
        for pending in &checkpoint.pending_urls {
            scheduler.enqueue(&pending.url, pending.depth, pending.priority);
        }
        for (url, depth) in &requeued {
            scheduler.enqueue(url, *depth, decayed_priority(LINK_PRIORITY, *depth));
        }

        let dedup = Arc::new(AssetDeduplicator::from_records(
            output_dir,
            checkpoint
                .downloaded_assets
                .iter()
                .map(|a| (a.local_path.clone(), a.hash.clone(), a.size)),
        ));
        let known_assets = checkpoint
            .downloaded_assets
            .iter()
            .map(|a| (a.url.clone(), a.local_path.clone()))
            .collect();

        info!(
            "Resuming job {}: {} completed, {} pending, {} failure(s) re-queued",
            checkpoint.job_id,
            checkpoint.completed_urls.len(),
            scheduler.frontier_size(),
            requeued.len()
        );

        self.pages_done = checkpoint.completed_urls.len();
        self.assets_captured = checkpoint.assets_captured;

        let store = CheckpointStore::from_checkpoint(output_dir, checkpoint, save_every);
        store.save().await?;

        Ok(Job {
            store,
            scheduler,
            resolved,
            resumed: true,
            resume_note,
            dedup,
            known_assets,
            pages_cached: 0,
        })
    }

    /// Seeds the frontier with the root and sitemap entries
    ///
    /// Discovery problems are logged and never fail the job.
    async fn seed_from_discovery(
        &mut self,
        client: &Client,
        render_config: &RenderConfig,
        timeout: Duration,
        job: &mut Job,
    ) {
        let user_agent = render_config
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT);
        let discovery = discover(client, &self.root, user_agent, timeout).await;

        if self.config.discovery.respect_robots {
            if let Some(robots) = discovery.robots {
                job.scheduler.set_robots(robots);
            }
        }

        let root = job.scheduler.enqueue(self.root.as_str(), 0, ROOT_PRIORITY);
        if !root.accepted() {
            warn!("Root URL {} was not queued ({:?})", self.root, root);
        }

        if self.config.discovery.sitemap {
            let mut seeded = 0;
            for entry in &discovery.entries {
                let priority = decayed_priority(
                    entry.priority.unwrap_or(SITEMAP_DEFAULT_PRIORITY),
                    1,
                );
                if job.scheduler.enqueue(&entry.url, 1, priority).accepted() {
                    seeded += 1;
                }
            }
            info!("Seeded {} URL(s) from sitemaps", seeded);
        }
    }

    fn page_context(
        &self,
        job: &Job,
        output_dir: &Path,
        pool: &RenderPool,
        client: &Client,
        render_config: RenderConfig,
        navigation_timeout: Duration,
    ) -> PageContext {
        let cache = self.open_cache(&job.resolved);

        let change_detector = match (&cache, job.resolved.incremental) {
            (Some(cache), true) => Some(self.change_detector.clone().unwrap_or_else(|| {
                Arc::new(
                    HttpChangeDetector::new(client.clone(), Arc::clone(cache))
                        .with_timeout(navigation_timeout),
                ) as Arc<dyn ChangeDetector>
            })),
            _ => None,
        };

        let assets = self.config.output.capture_assets.then(|| {
            let fetcher = self.asset_fetcher.clone().unwrap_or_else(|| {
                Arc::new(HttpAssetFetcher::new(client.clone(), navigation_timeout))
                    as Arc<dyn AssetFetcher>
            });
            Arc::new(
                AssetCollector::new(fetcher, Arc::clone(&job.dedup))
                    .with_known(job.known_assets.iter().cloned()),
            )
        });

        PageContext {
            output_dir: output_dir.to_path_buf(),
            pool: pool.clone(),
            render_config,
            wait_strategies: self.config.render.wait_strategies.clone(),
            navigation_timeout,
            retry: RetryCoordinator::new(RetryPolicy::from(&self.config.retry)),
            cache,
            cache_ttl: Duration::from_secs(self.config.cache.ttl_secs),
            change_detector,
            assets,
        }
    }

    fn open_cache(&self, resolved: &ResolvedOptions) -> Option<Arc<dyn PageCache>> {
        if !resolved.use_cache {
            return None;
        }
        if let Some(cache) = &self.cache {
            return Some(Arc::clone(cache));
        }
        match SqliteCache::open(&self.config.cache.path) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(
                    "Page cache at {} unavailable, continuing without it: {}",
                    self.config.cache.path.display(),
                    e
                );
                None
            }
        }
    }

    fn build_dispatcher(&self, concurrency: usize) -> Arc<dyn Dispatcher> {
        if let Some(dispatcher) = &self.dispatcher {
            return Arc::clone(dispatcher);
        }
        if self.config.distributed.enabled {
            Arc::new(DistributedExecutor::spawn_local(&self.config.distributed))
        } else {
            Arc::new(LocalExecutor::new(concurrency))
        }
    }

    /// The dequeue / dispatch / enqueue loop
    async fn crawl(
        &mut self,
        job: &mut Job,
        ctx: Arc<PageContext>,
        pool: &RenderPool,
    ) -> Result<StopReason> {
        let dispatcher = self.build_dispatcher(job.resolved.concurrency);
        let batch_size = job
            .resolved
            .concurrency
            .min(dispatcher.concurrency())
            .max(1);

        loop {
            let batch = job.scheduler.dequeue_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            job.store.set_pending(job.scheduler.snapshot()).await;
            debug!(
                "Dispatching batch of {} ({} queued)",
                batch.len(),
                job.scheduler.frontier_size()
            );

            let outcomes = dispatcher.dispatch(Arc::clone(&ctx), batch).await?;

            // No resource was ever created, so every render failure came from acquire
            if pool.stats().created_total == 0 {
                let acquire_failure = outcomes.iter().find_map(|o| {
                    o.result
                        .as_ref()
                        .err()
                        .filter(|f| !matches!(f.error, PageError::PageWrite { .. }))
                });
                if let Some(failure) = acquire_failure {
                    return Err(MirrorError::Render(failure.error.clone()));
                }
            }

            for outcome in outcomes {
                self.record_outcome(job, outcome).await?;
            }
        }

        let stop = job
            .scheduler
            .stop_reason()
            .unwrap_or(StopReason::FrontierExhausted);
        match stop {
            StopReason::FrontierExhausted => info!("Frontier exhausted"),
            StopReason::PageBudget => info!("Page budget reached"),
            StopReason::TimeBudget => info!(
                "Time budget reached after {:.1} min",
                job.scheduler.elapsed().as_secs_f64() / 60.0
            ),
        }
        Ok(stop)
    }

    /// Applies one page outcome to the scheduler and the checkpoint
    async fn record_outcome(&mut self, job: &mut Job, outcome: PageOutcome) -> Result<()> {
        let status = outcome.status();
        let key = outcome.item.key().to_string();
        let depth = outcome.item.depth;

        match outcome.result {
            Ok(success) => {
                job.scheduler.record_completed(&key);

                for asset in &success.assets.captured {
                    job.store
                        .record_asset(DownloadedAsset {
                            url: asset.url.clone(),
                            local_path: asset.local_path.clone(),
                            hash: asset.hash.clone(),
                            size: asset.size,
                        })
                        .await;
                    self.progress.file_written(asset.local_path.clone());
                }
                self.assets_captured += success.assets.captured.len();
                if !success.assets.failed.is_empty() {
                    job.store
                        .add_pending_assets(success.assets.failed.iter().map(|(u, _)| u.clone()))
                        .await;
                }

                let next_depth = depth + 1;
                let priority = decayed_priority(LINK_PRIORITY, next_depth);
                let queued = success
                    .links
                    .iter()
                    .filter(|link| {
                        job.scheduler
                            .enqueue(link.as_str(), next_depth, priority)
                            .accepted()
                    })
                    .count();

                // Children reach the pending list before the save that settles their parent
                job.store.set_pending(job.scheduler.snapshot()).await;
                job.store.mark_completed(&key).await?;
                if success.status == PageStatus::Cached {
                    job.pages_cached += 1;
                }
                self.progress.file_written(success.local_path.clone());

                info!(
                    url = %key,
                    status = %status,
                    "Cloned page {} ({} new link(s), {} bytes)",
                    job.scheduler.completed_count(),
                    queued,
                    success.bytes
                );
            }
            Err(failure) => {
                job.scheduler.record_failed(&key);
                job.store.set_pending(job.scheduler.snapshot()).await;
                job.store
                    .mark_failed(&key, failure.to_failed_url(depth))
                    .await?;
            }
        }

        self.pages_done = job.scheduler.completed_count();
        self.pages_total = job.scheduler.total_estimate();
        self.progress.emit(
            self.pages_done,
            self.pages_total,
            Some(key),
            ProgressStatus::Page { status },
            self.assets_captured,
            self.started.elapsed(),
        );
        Ok(())
    }

    /// Moves to `next`, rejecting transitions the phase machine forbids
    fn transition(&mut self, next: JobPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(MirrorError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        info!("Phase {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
        self.emit_phase();
        Ok(())
    }

    fn emit_phase(&self) {
        self.progress.emit(
            self.pages_done,
            self.pages_total,
            None,
            ProgressStatus::Phase { phase: self.phase },
            self.assets_captured,
            self.started.elapsed(),
        );
    }
}

/// Runs a clone of the root URL named in `config` with default collaborators
///
/// # Example
///
/// ```no_run
/// use sumi_mirror::config::Config;
/// use sumi_mirror::crawler::run_clone;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config {
///     url: Some("https://example.com/".to_string()),
///     ..Default::default()
/// };
/// let summary = run_clone(config).await?;
/// println!("{} pages cloned", summary.pages_cloned);
/// # Ok(())
/// # }
/// ```
pub async fn run_clone(config: Config) -> Result<CloneSummary> {
    Orchestrator::from_config(config)?.run().await
}

/// `(url, local path)` of every completed page
fn cloned_pages(checkpoint: &Checkpoint) -> Vec<(Url, PathBuf)> {
    checkpoint
        .completed_urls
        .iter()
        .filter_map(|url| Url::parse(url).ok())
        .map(|url| {
            let path = page_path(&url);
            (url, path)
        })
        .collect()
}

async fn remove_checkpoint(dir: &Path) -> Result<()> {
    for path in [
        CheckpointStore::primary_path(dir),
        CheckpointStore::backup_path(dir),
    ] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Discarded checkpoint {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_bad_root() {
        assert!(Orchestrator::new(Config::default(), "ftp://x.com/").is_err());
        assert!(Orchestrator::new(Config::default(), "not a url").is_err());
    }

    #[test]
    fn test_from_config_requires_url() {
        let err = Orchestrator::from_config(Config::default()).err().unwrap();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_root_is_normalized() {
        let orchestrator = Orchestrator::new(Config::default(), "https://X.com/a/#top").unwrap();
        assert_eq!(orchestrator.root().as_str(), "https://x.com/a");
        assert_eq!(orchestrator.phase(), JobPhase::Initializing);
    }

    #[test]
    fn test_transition_guards() {
        let mut orchestrator = Orchestrator::new(Config::default(), "https://x.com/").unwrap();
        assert!(orchestrator.transition(JobPhase::Crawling).is_ok());
        let err = orchestrator.transition(JobPhase::Exporting).unwrap_err();
        assert!(matches!(
            err,
            MirrorError::InvalidTransition {
                from: JobPhase::Crawling,
                to: JobPhase::Exporting
            }
        ));
    }

    #[tokio::test]
    async fn test_require_mode_without_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output.directory = dir.path().to_path_buf();
        config.discovery.sitemap = false;

        let err = Orchestrator::new(config, "https://x.com/")
            .unwrap()
            .with_resume_mode(ResumeMode::Require)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Checkpoint(_)));
    }
}
