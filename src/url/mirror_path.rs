//! Mapping from URLs to files in the offline copy
//!
//! All returned paths are relative to the clone's output directory.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Directory (under the output root) that holds captured assets
pub const ASSET_DIR: &str = "_assets";

/// Longest path segment written as-is; file systems cap names at 255 bytes
/// and the query suffix still has to fit
const MAX_SEGMENT_BYTES: usize = 200;

/// Returns the relative path a rendered page is saved to
///
/// `https://example.com/docs/intro` maps to `example.com/docs/intro/index.html`;
/// paths that already carry an `.html`/`.htm` extension are kept as-is.
/// Query strings become a short hash suffix so `?page=2` gets its own file.
///
/// ```
/// use sumi_mirror::url::page_path;
/// use std::path::PathBuf;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/docs/intro").unwrap();
/// assert_eq!(page_path(&url), PathBuf::from("example.com/docs/intro/index.html"));
/// ```
pub fn page_path(url: &Url) -> PathBuf {
    let mut path = PathBuf::from(host_dir(url));
    let segments = path_segments(url);

    let has_html_ext = segments
        .last()
        .map(|s| s.ends_with(".html") || s.ends_with(".htm"))
        .unwrap_or(false);

    if has_html_ext {
        let (dirs, file) = segments.split_at(segments.len() - 1);
        for dir in dirs {
            path.push(dir);
        }
        path.push(with_query_suffix(&file[0], url.query()));
    } else {
        for dir in &segments {
            path.push(dir);
        }
        path.push(with_query_suffix("index.html", url.query()));
    }

    path
}

/// Returns the relative path a captured asset is saved to
pub fn asset_path(url: &Url) -> PathBuf {
    let mut path = PathBuf::from(ASSET_DIR);
    path.push(host_dir(url));

    let segments = path_segments(url);
    if segments.is_empty() {
        path.push(with_query_suffix("index", url.query()));
        return path;
    }

    let (dirs, file) = segments.split_at(segments.len() - 1);
    for dir in dirs {
        path.push(dir);
    }
    path.push(with_query_suffix(&file[0], url.query()));
    path
}

/// Computes the link text that points from the file `from` to the file `to`
///
/// Both paths are relative to the output root. The result always uses `/`
/// separators so it can be written into HTML.
///
/// ```
/// use sumi_mirror::url::relative_link;
/// use std::path::Path;
///
/// let link = relative_link(
///     Path::new("example.com/docs/index.html"),
///     Path::new("example.com/about/index.html"),
/// );
/// assert_eq!(link, "../about/index.html");
/// ```
pub fn relative_link(from: &Path, to: &Path) -> String {
    let from_dir: Vec<Component> = from
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let to_parts: Vec<Component> = to.components().collect();

    let common = from_dir
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from_dir.len() {
        parts.push("..".to_string());
    }
    for component in &to_parts[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    parts.join("/")
}

fn host_dir(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown-host");
    match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host.to_string(),
    }
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .map(|s| shorten_segment(sanitize_segment(s)))
                .collect()
        })
        .unwrap_or_default()
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Cuts an over-long segment down to a prefix plus a hash of the full name,
/// keeping a short extension so the file type survives
fn shorten_segment(segment: String) -> String {
    if segment.len() <= MAX_SEGMENT_BYTES {
        return segment;
    }

    let digest = Sha256::digest(segment.as_bytes());
    let suffix = &hex::encode(digest)[..16];
    let ext = match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 10 => format!(".{}", ext),
        _ => String::new(),
    };

    let mut end = MAX_SEGMENT_BYTES - suffix.len() - ext.len() - 1;
    while !segment.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}-{}{}", &segment[..end], suffix, ext)
}

fn with_query_suffix(file: &str, query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return file.to_string();
    };

    let digest = Sha256::digest(query.as_bytes());
    let suffix = &hex::encode(digest)[..8];

    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", file, suffix),
    }
}
