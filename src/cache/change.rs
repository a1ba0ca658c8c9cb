//! Incremental change detection
//!
//! Before re-rendering a page that is already cached, the orchestrator asks a
//! [`ChangeDetector`] whether the origin copy changed. The HTTP detector sends
//! a conditional `HEAD` carrying the cached validators and only falls back to
//! fetching and hashing the body when the server gives no usable answer.

use crate::cache::{content_hash, PageCache};
use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Why a page was judged changed or unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    /// No cache entry to compare against
    NotCached,
    /// Server answered 304 to the conditional request
    NotModified,
    /// The current ETag equals the cached one
    EtagMatch,
    /// The current ETag or Last-Modified differs from the cached one
    ValidatorChanged,
    /// The body hashes to the cached content hash
    HashMatch,
    /// The body hashes to something else
    ContentChanged,
    /// The probe itself failed; treated as changed so the page is re-rendered
    ProbeFailed(String),
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCached => write!(f, "not cached"),
            Self::NotModified => write!(f, "not modified (304)"),
            Self::EtagMatch => write!(f, "etag unchanged"),
            Self::ValidatorChanged => write!(f, "validators changed"),
            Self::HashMatch => write!(f, "content hash unchanged"),
            Self::ContentChanged => write!(f, "content hash changed"),
            Self::ProbeFailed(e) => write!(f, "probe failed: {}", e),
        }
    }
}

/// Outcome of a change probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub has_changed: bool,
    pub reason: ChangeReason,
}

impl ChangeReport {
    pub fn changed(reason: ChangeReason) -> Self {
        Self {
            has_changed: true,
            reason,
        }
    }

    pub fn unchanged(reason: ChangeReason) -> Self {
        Self {
            has_changed: false,
            reason,
        }
    }
}

/// Decides whether a cached page must be re-rendered
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn detect_change(&self, url: &str) -> ChangeReport;
}

/// Change detector using HTTP conditional requests and body hashing
pub struct HttpChangeDetector {
    client: Client,
    cache: Arc<dyn PageCache>,
    timeout: Duration,
}

impl HttpChangeDetector {
    pub fn new(client: Client, cache: Arc<dyn PageCache>) -> Self {
        Self {
            client,
            cache,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        cached_hash: &str,
    ) -> Result<ChangeReport, reqwest::Error> {
        if etag.is_some() || last_modified.is_some() {
            let mut request = self.client.head(url).timeout(self.timeout);
            if let Some(etag) = etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }

            let response = request.send().await?;
            if response.status() == StatusCode::NOT_MODIFIED {
                return Ok(ChangeReport::unchanged(ChangeReason::NotModified));
            }

            if response.status().is_success() {
                let headers = response.headers();
                let current_etag = headers.get(ETAG).and_then(|v| v.to_str().ok());
                let current_modified = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok());

                match (etag, current_etag) {
                    (Some(old), Some(new)) if strip_weak(old) == strip_weak(new) => {
                        return Ok(ChangeReport::unchanged(ChangeReason::EtagMatch));
                    }
                    (Some(_), Some(_)) => {
                        return Ok(ChangeReport::changed(ChangeReason::ValidatorChanged));
                    }
                    _ => {}
                }

                if let (Some(old), Some(new)) = (last_modified, current_modified) {
                    if old != new {
                        return Ok(ChangeReport::changed(ChangeReason::ValidatorChanged));
                    }
                }
            }
        }

        // No usable validator answer; compare the body itself.
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        if content_hash(&body) == cached_hash {
            Ok(ChangeReport::unchanged(ChangeReason::HashMatch))
        } else {
            Ok(ChangeReport::changed(ChangeReason::ContentChanged))
        }
    }
}

fn strip_weak(etag: &str) -> &str {
    etag.strip_prefix("W/").unwrap_or(etag)
}

#[async_trait]
impl ChangeDetector for HttpChangeDetector {
    async fn detect_change(&self, url: &str) -> ChangeReport {
        let entry = match self.cache.peek(url) {
            Ok(Some(entry)) => entry,
            Ok(None) => return ChangeReport::changed(ChangeReason::NotCached),
            Err(e) => return ChangeReport::changed(ChangeReason::ProbeFailed(e.to_string())),
        };

        let report = self
            .probe(
                url,
                entry.etag.as_deref(),
                entry.last_modified.as_deref(),
                &entry.content_hash,
            )
            .await
            .unwrap_or_else(|e| ChangeReport::changed(ChangeReason::ProbeFailed(e.to_string())));

        debug!(url, changed = report.has_changed, reason = %report.reason, "Change probe");
        report
    }
}
