//! Crash-safe crawl state for resumable clones
//!
//! A [`Checkpoint`] is the durable snapshot of one clone job. It lives at
//! `<output>/.checkpoint.json`, with the previous version kept in
//! `<output>/.checkpoint.backup.json`. [`CheckpointStore`] owns the only
//! mutable copy and serializes every mutation and disk write.
//!
//! A URL is in at most one of `completed_urls`, `pending_urls` and
//! `failed_urls` at any time.

mod store;

pub use store::{CheckpointStore, LoadResult};

use crate::config::JobOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Bumped whenever the on-disk layout changes; a mismatch refuses resume
pub const SCHEMA_VERSION: u32 = 1;

/// Primary checkpoint file name
pub const CHECKPOINT_FILE: &str = ".checkpoint.json";

/// Previous checkpoint, written just before the primary is replaced
pub const BACKUP_FILE: &str = ".checkpoint.backup.json";

/// A frontier entry as persisted in the checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUrl {
    pub url: String,
    pub depth: u32,
    pub priority: f64,
}

/// A page that could not be cloned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedUrl {
    pub error: String,
    pub attempts: u32,
    /// Depth the URL was queued at, so a resumed job can re-queue it
    #[serde(default)]
    pub depth: u32,
    /// Permanent failures are never retried, not even by a resumed job
    #[serde(default)]
    pub permanent: bool,
}

/// An asset written to the output tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedAsset {
    pub url: String,
    /// Relative to the output directory
    pub local_path: PathBuf,
    pub hash: String,
    pub size: u64,
}

/// Durable state of one clone job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub schema_version: u32,
    pub job_id: String,
    pub root_url: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_urls: BTreeSet<String>,
    /// Frontier snapshot, highest priority first
    pub pending_urls: Vec<PendingUrl>,
    pub failed_urls: BTreeMap<String, FailedUrl>,
    pub downloaded_assets: Vec<DownloadedAsset>,
    pub pending_assets: BTreeSet<String>,
    pub pages_cloned: usize,
    pub assets_captured: usize,
    pub bytes_downloaded: u64,
    /// Options exactly as given, re-resolved on resume
    pub options: JobOptions,
    #[serde(default)]
    pub config_hash: Option<String>,
}

impl Checkpoint {
    /// Creates an empty checkpoint for a new job
    pub fn new(
        root_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            job_id: new_job_id(now),
            root_url: root_url.into(),
            output_dir: output_dir.into(),
            started_at: now,
            updated_at: now,
            completed_urls: BTreeSet::new(),
            pending_urls: Vec::new(),
            failed_urls: BTreeMap::new(),
            downloaded_assets: Vec::new(),
            pending_assets: BTreeSet::new(),
            pages_cloned: 0,
            assets_captured: 0,
            bytes_downloaded: 0,
            options,
            config_hash: None,
        }
    }

    /// Moves `url` to the completed set; returns false if it already was
    pub fn mark_completed(&mut self, url: &str) -> bool {
        self.pending_urls.retain(|p| p.url != url);
        self.failed_urls.remove(url);
        let newly = self.completed_urls.insert(url.to_string());
        if newly {
            self.pages_cloned += 1;
        }
        newly
    }

    /// Moves `url` to the failed ledger unless it already completed
    pub fn mark_failed(&mut self, url: &str, failure: FailedUrl) {
        if self.completed_urls.contains(url) {
            return;
        }
        self.pending_urls.retain(|p| p.url != url);
        self.failed_urls.insert(url.to_string(), failure);
    }

    /// Records an asset download; a URL is only counted once
    pub fn record_asset(&mut self, asset: DownloadedAsset) {
        self.pending_assets.remove(&asset.url);
        if self.downloaded_assets.iter().any(|a| a.url == asset.url) {
            return;
        }
        self.assets_captured += 1;
        self.bytes_downloaded += asset.size;
        self.downloaded_assets.push(asset);
    }

    /// Replaces the frontier snapshot, dropping URLs already settled
    pub fn set_pending(&mut self, pending: Vec<PendingUrl>) {
        let mut seen = BTreeSet::new();
        self.pending_urls = pending
            .into_iter()
            .filter(|p| {
                !self.completed_urls.contains(&p.url)
                    && !self.failed_urls.contains_key(&p.url)
                    && seen.insert(p.url.clone())
            })
            .collect();
    }

    /// Removes every non-permanent failure from the ledger and returns the
    /// URLs so the caller can put them back on the frontier
    pub fn requeue_transient_failures(&mut self) -> Vec<String> {
        let transient: Vec<String> = self
            .failed_urls
            .iter()
            .filter(|(_, f)| !f.permanent)
            .map(|(url, _)| url.clone())
            .collect();

        for url in &transient {
            self.failed_urls.remove(url);
        }
        transient
    }

    /// True if no URL appears in more than one of completed, pending and failed
    pub fn is_consistent(&self) -> bool {
        let mut pending = BTreeSet::new();
        for p in &self.pending_urls {
            if !pending.insert(p.url.as_str()) {
                return false;
            }
        }
        pending
            .iter()
            .all(|u| !self.completed_urls.contains(*u) && !self.failed_urls.contains_key(*u))
            && self
                .failed_urls
                .keys()
                .all(|u| !self.completed_urls.contains(u))
    }
}

fn new_job_id(now: DateTime<Utc>) -> String {
    format!("{}-{:08x}", now.format("%Y%m%d%H%M%S"), rand::random::<u32>())
}
