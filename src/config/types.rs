use crate::render::WaitStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default page budget when none is configured
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Default depth ceiling when none is configured
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Default number of concurrent page tasks
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Main configuration structure for Sumi-Mirror
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Root URL to clone (may also be given on the command line)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub job: JobOptions,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub distributed: DistributedSettings,
}

/// Per-job crawl options
///
/// Every field is optional; [`JobOptions::resolve`] is the only place defaults
/// are applied. The unresolved value is what gets stored in the checkpoint so
/// a resumed job re-resolves with identical semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobOptions {
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Zero means no time limit
    #[serde(default)]
    pub time_limit_minutes: Option<u64>,
    #[serde(default)]
    pub use_cache: Option<bool>,
    /// Only has an effect together with `use_cache`
    #[serde(default)]
    pub incremental: Option<bool>,
    /// Overrides both `max_pages` and `max_depth` to unbounded
    #[serde(default)]
    pub unlimited: Option<bool>,
}

/// Job options with every default applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// `None` means unbounded
    pub max_pages: Option<usize>,
    /// `None` means unbounded
    pub max_depth: Option<u32>,
    pub concurrency: usize,
    /// `None` means unbounded
    pub time_limit: Option<Duration>,
    pub use_cache: bool,
    pub incremental: bool,
}

impl JobOptions {
    /// Resolves every option to its effective value
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_mirror::config::JobOptions;
    ///
    /// let opts = JobOptions { unlimited: Some(true), ..Default::default() }.resolve();
    /// assert_eq!(opts.max_pages, None);
    /// assert_eq!(opts.max_depth, None);
    /// assert_eq!(opts.concurrency, 5);
    /// ```
    pub fn resolve(&self) -> ResolvedOptions {
        let unlimited = self.unlimited.unwrap_or(false);
        let use_cache = self.use_cache.unwrap_or(true);

        let time_limit = match self.time_limit_minutes.unwrap_or(0) {
            0 => None,
            minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
        };

        ResolvedOptions {
            max_pages: if unlimited {
                None
            } else {
                Some(self.max_pages.unwrap_or(DEFAULT_MAX_PAGES))
            },
            max_depth: if unlimited {
                None
            } else {
                Some(self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH))
            },
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            time_limit,
            use_cache,
            incremental: use_cache && self.incremental.unwrap_or(false),
        }
    }

    /// Overlays any value set in `other` on top of `self`
    pub fn merge(&self, other: &JobOptions) -> JobOptions {
        JobOptions {
            max_pages: other.max_pages.or(self.max_pages),
            max_depth: other.max_depth.or(self.max_depth),
            concurrency: other.concurrency.or(self.concurrency),
            time_limit_minutes: other.time_limit_minutes.or(self.time_limit_minutes),
            use_cache: other.use_cache.or(self.use_cache),
            incremental: other.incremental.or(self.incremental),
            unlimited: other.unlimited.or(self.unlimited),
        }
    }
}

/// Identity and navigation settings handed to the renderer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RenderSettings {
    pub user_agent: Option<String>,
    pub locale: Option<String>,
    pub proxy: Option<String>,
    /// Per-navigation timeout (milliseconds)
    pub navigation_timeout_ms: u64,
    /// Wait strategies tried in order until one succeeds
    pub wait_strategies: Vec<WaitStrategy>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            locale: None,
            proxy: None,
            navigation_timeout_ms: 30_000,
            wait_strategies: WaitStrategy::default_chain(),
        }
    }
}

/// Render pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 5,
            idle_timeout_secs: 300,
            acquire_timeout_secs: 60,
            reap_interval_secs: 30,
        }
    }
}

/// Backoff parameters for page navigation retries
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Checkpoint persistence settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CheckpointSettings {
    /// Force a save every this many page completions
    pub save_every: usize,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self { save_every: 5 }
    }
}

/// Page cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheSettings {
    /// Path to the SQLite cache database
    pub path: PathBuf,
    /// Entry lifetime (seconds)
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".sumi-mirror-cache.db"),
            ttl_secs: 3_600,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputSettings {
    /// Directory the offline copy is written to
    pub directory: PathBuf,
    /// Download images, stylesheets and scripts referenced by pages
    pub capture_assets: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./mirror"),
            capture_assets: true,
        }
    }
}

/// Sitemap and robots.txt discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DiscoverySettings {
    pub sitemap: bool,
    pub respect_robots: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            sitemap: true,
            respect_robots: false,
        }
    }
}

/// Task-queue worker mode
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DistributedSettings {
    pub enabled: bool,
    pub workers: usize,
    pub worker_capacity: usize,
    pub heartbeat_timeout_secs: u64,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: 4,
            worker_capacity: 2,
            heartbeat_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = JobOptions::default().resolve();
        assert_eq!(opts.max_pages, Some(DEFAULT_MAX_PAGES));
        assert_eq!(opts.max_depth, Some(DEFAULT_MAX_DEPTH));
        assert_eq!(opts.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(opts.time_limit, None);
        assert!(opts.use_cache);
        assert!(!opts.incremental);
    }

    #[test]
    fn test_unlimited_overrides_budgets() {
        let opts = JobOptions {
            max_pages: Some(3),
            max_depth: Some(1),
            unlimited: Some(true),
            ..Default::default()
        }
        .resolve();
        assert_eq!(opts.max_pages, None);
        assert_eq!(opts.max_depth, None);
    }

    #[test]
    fn test_incremental_requires_cache() {
        let opts = JobOptions {
            use_cache: Some(false),
            incremental: Some(true),
            ..Default::default()
        }
        .resolve();
        assert!(!opts.incremental);

        let opts = JobOptions {
            incremental: Some(true),
            ..Default::default()
        }
        .resolve();
        assert!(opts.incremental);
    }

    #[test]
    fn test_time_limit() {
        let opts = JobOptions {
            time_limit_minutes: Some(0),
            ..Default::default()
        }
        .resolve();
        assert_eq!(opts.time_limit, None);

        let opts = JobOptions {
            time_limit_minutes: Some(2),
            ..Default::default()
        }
        .resolve();
        assert_eq!(opts.time_limit, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_huge_time_limit_saturates() {
        let opts = JobOptions {
            time_limit_minutes: Some(u64::MAX),
            ..Default::default()
        }
        .resolve();
        assert_eq!(opts.time_limit, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_merge_prefers_other() {
        let base = JobOptions {
            max_pages: Some(10),
            concurrency: Some(2),
            ..Default::default()
        };
        let cli = JobOptions {
            max_pages: Some(50),
            ..Default::default()
        };
        let merged = base.merge(&cli);
        assert_eq!(merged.max_pages, Some(50));
        assert_eq!(merged.concurrency, Some(2));
    }
}
