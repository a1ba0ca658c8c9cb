//! Bounded pool of render resources
//!
//! The pool never holds more than `max_size` live resources. Callers get a
//! [`RenderLease`] that returns the resource on drop, so every code path
//! (including `?` and panics unwinding through a task) gives it back.
//! Idle resources past `idle_timeout` are destroyed by a background reaper,
//! never below `min_size`.

use crate::config::PoolSettings;
use crate::render::{RenderConfig, Renderer, RendererFactory};
use crate::PageError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pool sizing and timing
#[derive(Debug, Clone)]
pub struct RenderPoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for RenderPoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for RenderPoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            min_size: settings.min_size,
            max_size: settings.max_size.max(1),
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            acquire_timeout: Duration::from_secs(settings.acquire_timeout_secs),
            reap_interval: Duration::from_secs(settings.reap_interval_secs.max(1)),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub live: usize,
    pub created_total: u64,
}

struct IdleRenderer {
    id: u64,
    renderer: Box<dyn Renderer>,
    config: RenderConfig,
    idle_since: Instant,
}

struct PoolInner {
    config: RenderPoolConfig,
    factory: Arc<dyn RendererFactory>,
    idle: Mutex<VecDeque<IdleRenderer>>,
    /// One permit per resource that may be checked out
    permits: Arc<Semaphore>,
    /// Idle + checked out
    live: AtomicUsize,
    in_use: AtomicUsize,
    created_total: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleRenderer>> {
        // The queue stays structurally valid even if a holder panicked.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn create(&self, config: &RenderConfig) -> Result<(u64, Box<dyn Renderer>), PageError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        match self.factory.create(config).await {
            Ok(renderer) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.created_total.fetch_add(1, Ordering::Relaxed);
                debug!(id, "Created render resource");
                Ok((id, renderer))
            }
            Err(e) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn destroy(&self, id: u64, mut renderer: Box<dyn Renderer>) {
        renderer.close().await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(id, "Destroyed render resource");
    }

    fn take_matching(&self, config: &RenderConfig) -> Option<IdleRenderer> {
        let mut idle = self.idle();
        let position = idle.iter().position(|r| &r.config == config)?;
        idle.remove(position)
    }

    async fn reap_idle(&self) {
        let expired: Vec<IdleRenderer> = {
            let mut idle = self.idle();
            let live = self.live.load(Ordering::SeqCst);
            let mut removable = live.saturating_sub(self.config.min_size);
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();

            while let Some(entry) = idle.pop_front() {
                if removable > 0 && entry.idle_since.elapsed() > self.config.idle_timeout {
                    removable -= 1;
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
            expired
        };

        if !expired.is_empty() {
            info!("Reaping {} idle render resources", expired.len());
        }
        for entry in expired {
            self.destroy(entry.id, entry.renderer).await;
        }
    }
}

/// Bounded, health-checked pool of render resources
///
/// Constructed explicitly and injected into the orchestrator; cloning shares
/// the same pool.
#[derive(Clone)]
pub struct RenderPool {
    inner: Arc<PoolInner>,
}

impl RenderPool {
    /// Creates a pool (does NOT pre-warm or start the reaper; see [`RenderPool::start`])
    pub fn new(config: RenderPoolConfig, factory: Arc<dyn RendererFactory>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_size));
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                idle: Mutex::new(VecDeque::new()),
                permits,
                live: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                created_total: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                reaper: Mutex::new(None),
            }),
        }
    }

    /// Pre-warms `min_size` resources for `config` and starts the idle reaper
    pub async fn start(&self, config: &RenderConfig) -> Result<(), PageError> {
        let target = self.inner.config.min_size;
        while self.inner.live.load(Ordering::SeqCst) < target {
            let (id, renderer) = self.inner.create(config).await?;
            self.inner.idle().push_back(IdleRenderer {
                id,
                renderer,
                config: config.clone(),
                idle_since: Instant::now(),
            });
        }

        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.reap_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                inner.reap_idle().await;
            }
        });

        let mut reaper = self.inner.reaper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = reaper.replace(handle) {
            previous.abort();
        }

        info!(
            "Render pool started: {} pre-warmed, max {}",
            self.inner.live.load(Ordering::SeqCst),
            self.inner.config.max_size
        );
        Ok(())
    }

    /// Acquires a resource bound to `config`
    ///
    /// Waits until a resource is free or the `max_size` ceiling allows creating
    /// one. Fails with [`PageError::ResourcePoolExhausted`] after
    /// `acquire_timeout`, or immediately once the pool is closed.
    pub async fn acquire(&self, config: &RenderConfig) -> Result<RenderLease, PageError> {
        let inner = &self.inner;
        let timeout = inner.config.acquire_timeout;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(PageError::ResourcePoolExhausted(Duration::ZERO));
        }

        let permit = match tokio::time::timeout(timeout, inner.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PageError::ResourcePoolExhausted(Duration::ZERO)),
            Err(_) => return Err(PageError::ResourcePoolExhausted(timeout)),
        };

        while let Some(mut candidate) = inner.take_matching(config) {
            if candidate.renderer.is_healthy().await {
                debug!(id = candidate.id, "Reusing pooled render resource");
                return Ok(self.lease(candidate.id, candidate.renderer, config.clone(), permit));
            }
            warn!(id = candidate.id, "Render resource failed health check");
            inner.destroy(candidate.id, candidate.renderer).await;
        }

        // Make room by evicting an idle resource bound to a different identity.
        if inner.live.load(Ordering::SeqCst) >= inner.config.max_size {
            let evicted = inner.idle().pop_front();
            if let Some(entry) = evicted {
                inner.destroy(entry.id, entry.renderer).await;
            }
        }

        let (id, renderer) = inner.create(config).await?;
        Ok(self.lease(id, renderer, config.clone(), permit))
    }

    fn lease(
        &self,
        id: u64,
        renderer: Box<dyn Renderer>,
        config: RenderConfig,
        permit: OwnedSemaphorePermit,
    ) -> RenderLease {
        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        RenderLease {
            id,
            renderer: Some(renderer),
            config,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Forcibly destroys every idle resource and refuses further acquires
    ///
    /// Leases still held are destroyed as soon as they are dropped.
    pub async fn close_all(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.permits.close();

        if let Some(handle) = inner
            .reaper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        let drained: Vec<IdleRenderer> = inner.idle().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            inner.destroy(entry.id, entry.renderer).await;
        }
        info!("Render pool closed ({} idle resources destroyed)", count);
    }

    /// Runs one reaper pass immediately
    pub async fn reap_idle(&self) {
        self.inner.reap_idle().await;
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.inner.idle().len(),
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            live: self.inner.live.load(Ordering::SeqCst),
            created_total: self.inner.created_total.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive handle on one pooled render resource
///
/// Dropping the lease returns the resource to the idle set.
pub struct RenderLease {
    id: u64,
    renderer: Option<Box<dyn Renderer>>,
    config: RenderConfig,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl RenderLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The leased renderer
    ///
    /// Fails with `TargetClosed` once the pool has been closed underneath
    /// the lease.
    pub fn renderer(&mut self) -> Result<&mut (dyn Renderer + 'static), PageError> {
        if self.pool.closed.load(Ordering::SeqCst) {
            return Err(PageError::TargetClosed {
                url: format!("render resource {}", self.id),
            });
        }
        self.renderer
            .as_deref_mut()
            .ok_or_else(|| PageError::TargetClosed {
                url: format!("render resource {}", self.id),
            })
    }

    /// Returns the resource to the pool
    pub fn release(self) {
        drop(self);
    }

    /// Destroys the resource instead of returning it
    pub async fn discard(mut self) {
        if let Some(renderer) = self.renderer.take() {
            self.pool.destroy(self.id, renderer).await;
        }
    }
}

impl Drop for RenderLease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);

        let Some(mut renderer) = self.renderer.take() else {
            return;
        };

        if !self.pool.closed.load(Ordering::SeqCst) {
            self.pool.idle().push_back(IdleRenderer {
                id: self.id,
                renderer,
                config: self.config.clone(),
                idle_since: Instant::now(),
            });
            return;
        }

        let pool = Arc::clone(&self.pool);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    renderer.close().await;
                    pool.live.fetch_sub(1, Ordering::SeqCst);
                    debug!(id, "Destroyed render resource after pool close");
                });
            }
            Err(_) => {
                pool.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Navigation, WaitStrategy};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    struct StubRenderer {
        closed: Arc<AtomicUsize>,
        healthy: bool,
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn navigate(
            &mut self,
            url: &Url,
            _wait: WaitStrategy,
            _timeout: Duration,
        ) -> Result<Navigation, PageError> {
            Ok(Navigation {
                html: String::new(),
                status: 200,
                final_url: url.to_string(),
                etag: None,
                last_modified: None,
            })
        }

        async fn extract_links(&mut self) -> Result<Vec<String>, PageError> {
            Ok(Vec::new())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
            Err(PageError::Unsupported("screenshots"))
        }

        async fn is_healthy(&mut self) -> bool {
            self.healthy
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubFactory {
        created: AtomicUsize,
        closed: Arc<AtomicUsize>,
        unhealthy_first: bool,
    }

    #[async_trait]
    impl RendererFactory for StubFactory {
        async fn create(&self, _config: &RenderConfig) -> Result<Box<dyn Renderer>, PageError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubRenderer {
                closed: Arc::clone(&self.closed),
                healthy: !(self.unhealthy_first && n == 0),
            }))
        }
    }

    fn pool_config(min: usize, max: usize) -> RenderPoolConfig {
        RenderPoolConfig {
            min_size: min,
            max_size: max,
            idle_timeout: Duration::from_millis(10),
            acquire_timeout: Duration::from_millis(100),
            reap_interval: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_reuse() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(0, 2), factory.clone());
        let config = RenderConfig::default();

        let lease = pool.acquire(&config).await.unwrap();
        assert_eq!(pool.stats().in_use, 1);
        drop(lease);
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().in_use, 0);

        let _lease = pool.acquire(&config).await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_prewarms_to_min_size() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(2, 4), factory.clone());
        pool.start(&RenderConfig::default()).await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.live, 2);
        pool.close_all().await;
    }

    #[tokio::test]
    async fn test_max_size_bounds_acquire() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(0, 1), factory);
        let config = RenderConfig::default();

        let _held = pool.acquire(&config).await.unwrap();
        let second = pool.acquire(&config).await;
        assert!(matches!(second, Err(PageError::ResourcePoolExhausted(_))));
    }

    #[tokio::test]
    async fn test_waiter_gets_released_resource() {
        let factory = Arc::new(StubFactory::default());
        let mut config = pool_config(0, 1);
        config.acquire_timeout = Duration::from_secs(5);
        let pool = RenderPool::new(config, factory.clone());
        let render_config = RenderConfig::default();

        let held = pool.acquire(&render_config).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let render_config = render_config.clone();
            tokio::spawn(async move { pool.acquire(&render_config).await.map(|l| l.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let held_id = held.id();
        held.release();

        let waiter_id = waiter.await.unwrap().unwrap();
        assert_eq!(waiter_id, held_id);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_returned_on_error_path() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(0, 1), factory);

        async fn failing(pool: &RenderPool) -> Result<(), PageError> {
            let _lease = pool.acquire(&RenderConfig::default()).await?;
            Err(PageError::Unsupported("test"))
        }

        assert!(failing(&pool).await.is_err());
        assert_eq!(pool.stats().in_use, 0);
        assert!(pool.acquire(&RenderConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_identity_evicts_idle() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(0, 1), factory.clone());

        drop(pool.acquire(&RenderConfig::default()).await.unwrap());
        let other = RenderConfig {
            user_agent: Some("Other/1.0".to_string()),
            ..Default::default()
        };
        let _lease = pool.acquire(&other).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_resource_replaced() {
        let factory = Arc::new(StubFactory {
            unhealthy_first: true,
            ..Default::default()
        });
        let pool = RenderPool::new(pool_config(0, 2), factory.clone());
        let config = RenderConfig::default();

        drop(pool.acquire(&config).await.unwrap());
        let _lease = pool.acquire(&config).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reaper_keeps_min_size() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(1, 3), factory.clone());
        let config = RenderConfig::default();

        let a = pool.acquire(&config).await.unwrap();
        let b = pool.acquire(&config).await.unwrap();
        let c = pool.acquire(&config).await.unwrap();
        drop((a, b, c));
        assert_eq!(pool.stats().idle, 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.reap_idle().await;

        assert_eq!(pool.stats().live, 1);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_all_destroys_and_refuses() {
        let factory = Arc::new(StubFactory::default());
        let pool = RenderPool::new(pool_config(2, 2), factory.clone());
        pool.start(&RenderConfig::default()).await.unwrap();

        pool.close_all().await;
        assert_eq!(pool.stats().live, 0);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 2);
        assert!(pool.acquire(&RenderConfig::default()).await.is_err());
    }
}
