//! The unit of work for one page
//!
//! `process_page` checks the cache, otherwise renders through the pool with
//! the wait-strategy fallback chain, captures assets, writes the page into the
//! output tree and reports discovered links. Page-level failures come back
//! inside the [`PageOutcome`], including a page file that cannot be written.
//! Only an unusable output directory is returned as an error, since no later
//! page could be saved either.

use crate::assets::{extract_asset_urls, AssetCollector, CollectedAssets};
use crate::cache::{CacheEntry, CacheError, CacheResult, ChangeDetector, PageCache};
use crate::checkpoint::FailedUrl;
use crate::crawler::parser::extract_links;
use crate::crawler::scheduler::FrontierItem;
use crate::output::write_atomic;
use crate::render::{Navigation, RenderConfig, RenderPool, Renderer, WaitStrategy};
use crate::retry::{classify, is_permanent, recovery_hint, ErrorClass, RetryCoordinator};
use crate::state::PageStatus;
use crate::url::{normalize_url, page_path};
use crate::{PageError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Everything a page task needs, shared by all tasks of a job
pub struct PageContext {
    /// Root of the offline copy
    pub output_dir: PathBuf,
    pub pool: RenderPool,
    pub render_config: RenderConfig,
    /// Tried in order, one per attempt; the last one repeats
    pub wait_strategies: Vec<WaitStrategy>,
    pub navigation_timeout: Duration,
    pub retry: RetryCoordinator,
    /// `None` when the job runs with caching disabled
    pub cache: Option<Arc<dyn PageCache>>,
    pub cache_ttl: Duration,
    /// Consulted instead of the TTL when the job is incremental
    pub change_detector: Option<Arc<dyn ChangeDetector>>,
    /// `None` when asset capture is disabled
    pub assets: Option<Arc<AssetCollector>>,
}

impl PageContext {
    fn wait_for(&self, attempt: u32) -> WaitStrategy {
        let index = (attempt as usize).min(self.wait_strategies.len().saturating_sub(1));
        self.wait_strategies
            .get(index)
            .copied()
            .unwrap_or(WaitStrategy::NetworkIdle)
    }
}

/// A page that was cloned
#[derive(Debug, Clone)]
pub struct PageSuccess {
    pub status: PageStatus,
    /// Where the HTML was written, relative to the output directory
    pub local_path: PathBuf,
    /// Normalized outgoing links (not yet origin-filtered)
    pub links: Vec<Url>,
    pub assets: CollectedAssets,
    /// Page bytes plus newly downloaded asset bytes
    pub bytes: u64,
    pub attempts: u32,
}

/// A page that could not be cloned
#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub error: PageError,
    pub attempts: u32,
    pub permanent: bool,
}

impl PageFailure {
    /// Checkpoint ledger entry for this failure
    pub fn to_failed_url(&self, depth: u32) -> FailedUrl {
        FailedUrl {
            error: self.error.to_string(),
            attempts: self.attempts,
            depth,
            permanent: self.permanent,
        }
    }
}

/// Result of one page task
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub item: FrontierItem,
    pub result: std::result::Result<PageSuccess, PageFailure>,
}

impl PageOutcome {
    pub fn status(&self) -> PageStatus {
        match &self.result {
            Ok(success) => success.status,
            Err(failure) if failure.permanent => PageStatus::PermanentlyFailed,
            Err(_) => PageStatus::Failed,
        }
    }
}

struct Rendered {
    navigation: Navigation,
    links: Vec<String>,
}

/// Clones one page
///
/// # Arguments
///
/// * `ctx` - Shared job context
/// * `item` - The dequeued frontier item
///
/// # Returns
///
/// * `Ok(PageOutcome)` - The page was cloned, or failed in a way the job survives
/// * `Err(MirrorError::Io)` - The output directory itself is gone or unusable
pub async fn process_page(ctx: &PageContext, item: FrontierItem) -> Result<PageOutcome> {
    let url = item.url.clone();

    let (html, links, asset_urls, status, attempts, validators) =
        match lookup_cache(ctx, &url).await {
            Some(entry) => {
                debug!(url = %url, "Serving page from cache");
                let links = extract_links(&entry.content, &url);
                let assets = entry
                    .asset_urls
                    .iter()
                    .filter_map(|a| Url::parse(a).ok())
                    .collect::<Vec<_>>();
                (entry.content, links, assets, PageStatus::Cached, 0, None)
            }
            None => {
                let outcome = ctx
                    .retry
                    .retry_if(
                        |attempt| render_once(ctx, &url, attempt),
                        |e| classify(e) == ErrorClass::Transient,
                    )
                    .await;

                let rendered = match outcome.result {
                    Ok(rendered) => rendered,
                    Err(error) => {
                        let permanent = is_permanent(&error);
                        warn!(
                            url = %url,
                            attempts = outcome.attempts,
                            permanent,
                            "Page failed: {} ({})",
                            error,
                            recovery_hint(&error)
                        );
                        return Ok(PageOutcome {
                            item,
                            result: Err(PageFailure {
                                error,
                                attempts: outcome.attempts,
                                permanent,
                            }),
                        });
                    }
                };

                let base =
                    Url::parse(&rendered.navigation.final_url).unwrap_or_else(|_| url.clone());
                let links = rendered
                    .links
                    .iter()
                    .filter_map(|l| normalize_url(l).ok())
                    .collect::<Vec<_>>();
                let assets = extract_asset_urls(&rendered.navigation.html, &base);
                let validators = Some((
                    rendered.navigation.etag.clone(),
                    rendered.navigation.last_modified.clone(),
                ));
                (
                    rendered.navigation.html,
                    links,
                    assets,
                    PageStatus::Rendered,
                    outcome.attempts,
                    validators,
                )
            }
        };

    let assets = match &ctx.assets {
        Some(collector) => collector.collect(&asset_urls).await,
        None => CollectedAssets::default(),
    };

    let local_path = page_path(&url);
    if let Err(e) = write_atomic(&ctx.output_dir.join(&local_path), html.as_bytes()).await {
        // Only a broken output root stops the job; a bad page path fails the page
        if !tokio::fs::metadata(&ctx.output_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(e.into());
        }
        warn!(url = %url, "Failed to save {}: {}", local_path.display(), e);
        return Ok(PageOutcome {
            item,
            result: Err(PageFailure {
                error: PageError::PageWrite {
                    url: url.to_string(),
                    message: e.to_string(),
                },
                attempts,
                permanent: true,
            }),
        });
    }

    if let (Some(cache), Some((etag, last_modified))) = (&ctx.cache, validators) {
        let entry = CacheEntry::new(url.as_str(), html.as_str(), ctx.cache_ttl)
            .with_assets(asset_urls.iter().map(Url::to_string).collect())
            .with_validators(etag, last_modified);
        if let Err(e) = blocking(cache, move |cache| cache.put(&entry)).await {
            warn!(url = %url, "Failed to cache page: {}", e);
        }
    }

    let bytes = html.len() as u64 + assets.bytes();
    debug!(
        url = %url,
        status = %status,
        links = links.len(),
        assets = assets.resolved.len(),
        "Saved {}",
        local_path.display()
    );

    Ok(PageOutcome {
        item,
        result: Ok(PageSuccess {
            status,
            local_path,
            links,
            assets,
            bytes,
            attempts,
        }),
    })
}

/// Returns a reusable cache entry, or `None` if the page must be rendered
///
/// Cache failures are treated as misses.
async fn lookup_cache(ctx: &PageContext, url: &Url) -> Option<CacheEntry> {
    let cache = ctx.cache.as_ref()?;
    let key = url.as_str();

    if let Some(detector) = &ctx.change_detector {
        let owned = key.to_string();
        let entry = match blocking(cache, move |cache| cache.peek(&owned)).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(url = key, "Cache read failed: {}", e);
                return None;
            }
        };
        let report = detector.detect_change(key).await;
        if report.has_changed {
            debug!(url = key, reason = %report.reason, "Page changed since cached");
            return None;
        }
        let (owned, ttl) = (key.to_string(), ctx.cache_ttl);
        if let Err(e) = blocking(cache, move |cache| cache.refresh(&owned, ttl)).await {
            warn!(url = key, "Cache refresh failed: {}", e);
        }
        return Some(entry);
    }

    let owned = key.to_string();
    match blocking(cache, move |cache| cache.get(&owned)).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(url = key, "Cache read failed: {}", e);
            None
        }
    }
}

/// Runs a synchronous cache call on the blocking thread pool
async fn blocking<T, F>(cache: &Arc<dyn PageCache>, call: F) -> CacheResult<T>
where
    F: FnOnce(&dyn PageCache) -> CacheResult<T> + Send + 'static,
    T: Send + 'static,
{
    let cache = Arc::clone(cache);
    tokio::task::spawn_blocking(move || call(cache.as_ref()))
        .await
        .map_err(|e| CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// One render attempt on a freshly acquired resource
///
/// The resource is destroyed instead of returned when it died mid-task.
async fn render_once(
    ctx: &PageContext,
    url: &Url,
    attempt: u32,
) -> std::result::Result<Rendered, PageError> {
    let wait = ctx.wait_for(attempt);
    let mut lease = ctx.pool.acquire(&ctx.render_config).await?;
    debug!(url = %url, attempt, wait = %wait, lease = lease.id(), "Rendering");

    let result = navigate(lease.renderer()?, url, wait, ctx.navigation_timeout).await;

    match &result {
        Err(PageError::TargetClosed { .. }) | Err(PageError::ProtocolTimeout(_)) => {
            lease.discard().await
        }
        _ => lease.release(),
    }
    result
}

async fn navigate(
    renderer: &mut dyn Renderer,
    url: &Url,
    wait: WaitStrategy,
    timeout: Duration,
) -> std::result::Result<Rendered, PageError> {
    let navigation = renderer.navigate(url, wait, timeout).await?;
    if navigation.status >= 400 {
        return Err(PageError::Http {
            url: url.to_string(),
            status: navigation.status,
        });
    }

    let links = match renderer.extract_links().await {
        Ok(links) => links,
        Err(PageError::Unsupported(_)) => extract_links(&navigation.html, url)
            .into_iter()
            .map(String::from)
            .collect(),
        Err(e) => return Err(e),
    };

    Ok(Rendered { navigation, links })
}
