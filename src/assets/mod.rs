//! Asset capture
//!
//! Finds the images, stylesheets, scripts and icons a page references,
//! downloads them into the output tree under [`crate::url::ASSET_DIR`], and
//! collapses identical downloads through the [`AssetDeduplicator`].

mod dedup;

pub use dedup::{AssetDeduplicator, DedupResult};

use crate::output::write_atomic;
use crate::render::transport_error;
use crate::url::{asset_path, resolve_link};
use crate::PageError;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// `(selector, attribute)` pairs that reference page assets
const ASSET_SELECTORS: &[(&str, &str)] = &[
    ("img[src]", "src"),
    ("script[src]", "src"),
    ("link[rel~='stylesheet'][href]", "href"),
    ("link[rel~='icon'][href]", "href"),
    ("link[rel='apple-touch-icon'][href]", "href"),
    ("source[src]", "src"),
    ("video[poster]", "poster"),
];

/// Extracts absolute asset URLs referenced by `html`, de-duplicated and
/// grouped by element kind (images first, then scripts, stylesheets, icons)
///
/// ```
/// use sumi_mirror::assets::extract_asset_urls;
/// use url::Url;
///
/// let html = r#"<link rel="stylesheet" href="/site.css"><img src="logo.png">"#;
/// let base = Url::parse("https://example.com/docs/").unwrap();
/// let assets = extract_asset_urls(html, &base);
/// assert_eq!(assets[0].as_str(), "https://example.com/docs/logo.png");
/// assert_eq!(assets[1].as_str(), "https://example.com/site.css");
/// ```
pub fn extract_asset_urls(html: &str, base_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut assets = Vec::new();

    for (selector, attribute) in ASSET_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(value) = element.value().attr(attribute) else {
                continue;
            };
            if let Some(url) = resolve_link(value, base_url) {
                if matches!(url.scheme(), "http" | "https") && seen.insert(url.to_string()) {
                    assets.push(url);
                }
            }
        }
    }

    assets
}

/// Downloads asset bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, PageError>;
}

/// Fetches assets over HTTP
pub struct HttpAssetFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpAssetFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, PageError> {
        let capture_error = |e: PageError| PageError::AssetCapture {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| capture_error(transport_error(url, self.timeout, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageError::AssetCapture {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| capture_error(transport_error(url, self.timeout, e)))?;
        Ok(bytes.to_vec())
    }
}

/// A downloaded and deduplicated asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAsset {
    pub url: String,
    /// Where this URL's file lives, relative to the output directory
    pub local_path: PathBuf,
    /// Where the bytes physically live (differs from `local_path` for duplicates)
    pub canonical_path: PathBuf,
    pub hash: String,
    pub size: u64,
    pub reference_count: usize,
}

/// Downloads `url` into the output tree and deduplicates it
///
/// # Arguments
///
/// * `fetcher` - Source of the asset bytes
/// * `dedup` - Content-addressed store rooted at the output directory
/// * `url` - Absolute asset URL
///
/// # Returns
///
/// * `Ok(CapturedAsset)` - The asset is on disk
/// * `Err(PageError::AssetCapture)` - Download or write failed
pub async fn capture_asset(
    fetcher: &dyn AssetFetcher,
    dedup: &AssetDeduplicator,
    url: &Url,
) -> Result<CapturedAsset, PageError> {
    let local_path = asset_path(url);
    let bytes = fetcher.fetch(url).await?;

    let write_error = |e: std::io::Error| PageError::AssetCapture {
        url: url.to_string(),
        message: e.to_string(),
    };

    write_atomic(&dedup.root().join(&local_path), &bytes)
        .await
        .map_err(write_error)?;
    let result = dedup.dedupe(&local_path).await.map_err(write_error)?;

    Ok(CapturedAsset {
        url: url.to_string(),
        local_path,
        canonical_path: result.canonical_path,
        hash: result.hash,
        size: result.size,
        reference_count: result.reference_count,
    })
}

/// Result of [`AssetCollector::collect`] for one page
#[derive(Debug, Clone, Default)]
pub struct CollectedAssets {
    /// Downloaded during this call
    pub captured: Vec<CapturedAsset>,
    /// Every asset of the page that is on disk: `(url, local path)`
    pub resolved: Vec<(String, PathBuf)>,
    /// Assets that could not be captured, left pointing at the network
    pub failed: Vec<(String, PageError)>,
}

impl CollectedAssets {
    pub fn bytes(&self) -> u64 {
        self.captured.iter().map(|a| a.size).sum()
    }
}

/// Captures assets for a whole job, downloading each URL at most once
pub struct AssetCollector {
    fetcher: Arc<dyn AssetFetcher>,
    dedup: Arc<AssetDeduplicator>,
    known: Mutex<HashMap<String, PathBuf>>,
}

impl AssetCollector {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, dedup: Arc<AssetDeduplicator>) -> Self {
        Self {
            fetcher,
            dedup,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Marks assets as already on disk (e.g. from a resumed checkpoint)
    pub fn with_known<I>(self, assets: I) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        self.lock().extend(assets);
        self
    }

    pub fn deduplicator(&self) -> &AssetDeduplicator {
        &self.dedup
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Local path of an asset captured earlier in the job
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        self.lock().get(url).cloned()
    }

    /// Every captured `(url, local path)` pair
    pub fn known(&self) -> Vec<(String, PathBuf)> {
        self.lock()
            .iter()
            .map(|(u, p)| (u.clone(), p.clone()))
            .collect()
    }

    /// Captures every URL in `urls` not already on disk
    ///
    /// Failures are collected, never returned as an error: a missing asset
    /// degrades the page but does not fail it.
    pub async fn collect(&self, urls: &[Url]) -> CollectedAssets {
        let mut out = CollectedAssets::default();

        for url in urls {
            let key = url.to_string();
            if let Some(path) = self.local_path(&key) {
                out.resolved.push((key, path));
                continue;
            }

            match capture_asset(self.fetcher.as_ref(), &self.dedup, url).await {
                Ok(asset) => {
                    debug!(
                        url = %url,
                        refs = asset.reference_count,
                        "Captured asset {}",
                        asset.local_path.display()
                    );
                    self.lock().insert(key.clone(), asset.local_path.clone());
                    out.resolved.push((key, asset.local_path.clone()));
                    out.captured.push(asset);
                }
                Err(e) => {
                    warn!(url = %url, "{}", e);
                    out.failed.push((key, e));
                }
            }
        }

        out
    }
}

/// Returns true if an asset recorded at `local_path` still resolves under `root`
pub fn asset_exists(root: &Path, local_path: &Path) -> bool {
    root.join(local_path).exists()
}
