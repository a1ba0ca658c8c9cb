//! URL handling module for Sumi-Mirror
//!
//! This module provides URL normalization (the dedup key for pages), origin
//! comparison against the clone root, and the mapping from URLs to paths in
//! the offline copy.

mod mirror_path;
mod normalize;

pub use mirror_path::{asset_path, page_path, relative_link, ASSET_DIR};
pub use normalize::normalize_url;

use url::Url;

/// Returns true if `url` has the same origin (scheme, host, port) as `root`
///
/// # Examples
///
/// ```
/// use sumi_mirror::url::same_origin;
/// use url::Url;
///
/// let root = Url::parse("https://example.com/").unwrap();
/// assert!(same_origin(&Url::parse("https://example.com:443/a").unwrap(), &root));
/// assert!(!same_origin(&Url::parse("http://example.com/a").unwrap(), &root));
/// assert!(!same_origin(&Url::parse("https://cdn.example.com/a").unwrap(), &root));
/// ```
pub fn same_origin(url: &Url, root: &Url) -> bool {
    url.origin() == root.origin()
}

/// Normalizes `href` relative to `base`, returning `None` for links that can
/// never be cloned (javascript:, mailto:, fragment-only, malformed)
pub fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}
