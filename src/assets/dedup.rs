//! Content-addressed asset store
//!
//! Every distinct content hash has exactly one canonical physical file. When a
//! second asset arrives with the same bytes, its file is replaced by a relative
//! symlink to the canonical copy. Platforms or filesystems without symlinks
//! keep the duplicate physical file; the clone stays correct, only larger.

use crate::cache::content_hash;
use crate::url::relative_link;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Result of deduplicating one asset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupResult {
    /// Path (relative to the store root) holding the physical bytes
    pub canonical_path: PathBuf,
    /// Hex SHA-256 of the content
    pub hash: String,
    pub size: u64,
    /// Number of distinct caller paths sharing this content
    pub reference_count: usize,
}

#[derive(Debug)]
struct StoredAsset {
    canonical_path: PathBuf,
    size: u64,
    references: BTreeSet<PathBuf>,
}

/// Deduplicates asset files under a root directory
///
/// Paths handed in and returned are relative to `root`.
#[derive(Debug)]
pub struct AssetDeduplicator {
    root: PathBuf,
    by_hash: Mutex<HashMap<String, StoredAsset>>,
}

impl AssetDeduplicator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            by_hash: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuilds the store from previously recorded `(local_path, hash, size)`
    /// triples, e.g. a checkpoint's downloaded-asset ledger
    ///
    /// The first path seen for a hash becomes its canonical copy. No files
    /// are touched.
    pub fn from_records<I>(root: impl Into<PathBuf>, records: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, String, u64)>,
    {
        let dedup = Self::new(root);
        {
            let mut by_hash = dedup.lock();
            for (path, hash, size) in records {
                by_hash
                    .entry(hash)
                    .or_insert_with(|| StoredAsset {
                        canonical_path: path.clone(),
                        size,
                        references: BTreeSet::new(),
                    })
                    .references
                    .insert(path);
            }
        }
        dedup
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredAsset>> {
        self.by_hash.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hashes the file at `local_path` and collapses it onto an existing copy
    /// with identical content
    ///
    /// Calling this twice for the same path counts one reference.
    ///
    /// # Arguments
    ///
    /// * `local_path` - File path relative to the store root
    ///
    /// # Returns
    ///
    /// * `Ok(DedupResult)` - Canonical location and fan-in for the content
    /// * `Err(io::Error)` - The file could not be read
    pub async fn dedupe(&self, local_path: &Path) -> io::Result<DedupResult> {
        let bytes = tokio::fs::read(self.root.join(local_path)).await?;
        let hash = content_hash(&bytes);
        let size = bytes.len() as u64;

        let (canonical_path, is_new_duplicate, reference_count) = {
            let mut by_hash = self.lock();
            let stored = by_hash.entry(hash.clone()).or_insert_with(|| StoredAsset {
                canonical_path: local_path.to_path_buf(),
                size,
                references: BTreeSet::new(),
            });
            let inserted = stored.references.insert(local_path.to_path_buf());
            let is_duplicate = inserted && stored.canonical_path != local_path;
            (
                stored.canonical_path.clone(),
                is_duplicate,
                stored.references.len(),
            )
        };

        if is_new_duplicate {
            self.link_to_canonical(local_path, &canonical_path).await;
        }

        Ok(DedupResult {
            canonical_path,
            hash,
            size,
            reference_count,
        })
    }

    /// Number of distinct contents stored
    pub fn unique_count(&self) -> usize {
        self.lock().len()
    }

    /// Bytes saved by deduplication (duplicate references times content size)
    pub fn bytes_saved(&self) -> u64 {
        self.lock()
            .values()
            .map(|s| s.size * s.references.len().saturating_sub(1) as u64)
            .sum()
    }

    /// Reference count for a content hash
    pub fn references(&self, hash: &str) -> usize {
        self.lock()
            .get(hash)
            .map(|s| s.references.len())
            .unwrap_or(0)
    }

    #[cfg(unix)]
    async fn link_to_canonical(&self, local_path: &Path, canonical_path: &Path) {
        let target = relative_link(local_path, canonical_path);
        let absolute = self.root.join(local_path);
        let tmp = absolute.with_extension("dedup-link");

        let _ = tokio::fs::remove_file(&tmp).await;
        if let Err(e) = tokio::fs::symlink(&target, &tmp).await {
            debug!(path = %local_path.display(), "Symlink unavailable, keeping copy: {}", e);
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &absolute).await {
            debug!(path = %local_path.display(), "Could not replace duplicate, keeping copy: {}", e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return;
        }
        debug!(
            path = %local_path.display(),
            canonical = %canonical_path.display(),
            "Linked duplicate asset"
        );
    }

    #[cfg(not(unix))]
    async fn link_to_canonical(&self, local_path: &Path, _canonical_path: &Path) {
        debug!(path = %local_path.display(), "Keeping physical copy of duplicate asset");
    }
}
