//! Rewrites links in saved pages to point into the offline copy
//!
//! Only `href`, `src` and `poster` values that resolve to a cloned page or a
//! captured asset are touched; everything else keeps pointing at the network.
//! Rewriting is idempotent, so a resumed job can run it again safely.

use crate::output::write_atomic;
use crate::url::{normalize_url, relative_link};
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

const LINK_ATTRIBUTES: &[&str] = &["href", "src", "poster"];

/// Normalized URL -> local path (relative to the output directory)
#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    targets: HashMap<String, PathBuf>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, local_path: impl Into<PathBuf>) {
        self.targets.insert(url.into(), local_path.into());
    }

    pub fn get(&self, url: &str) -> Option<&Path> {
        self.targets.get(url).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Totals for one link-fixing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkFixReport {
    pub pages_rewritten: usize,
    pub links_rewritten: usize,
    /// Pages whose file was missing
    pub pages_missing: usize,
}

/// Rewrites the links of one document
///
/// # Arguments
///
/// * `html` - The saved page
/// * `page_url` - URL the page was cloned from
/// * `page_path` - Where the page lives, relative to the output directory
/// * `map` - Every cloned page and captured asset
///
/// # Returns
///
/// The rewritten document and the number of attribute values changed
///
/// ```
/// use sumi_mirror::crawler::{rewrite_links, LinkMap};
/// use std::path::Path;
/// use url::Url;
///
/// let mut map = LinkMap::new();
/// map.insert("https://x.com/about", "x.com/about/index.html");
///
/// let page = Url::parse("https://x.com/").unwrap();
/// let (html, changed) = rewrite_links(
///     r#"<a href="/about#team">Team</a>"#,
///     &page,
///     Path::new("x.com/index.html"),
///     &map,
/// );
/// assert_eq!(changed, 1);
/// assert!(html.contains(r#"href="about/index.html#team""#));
/// ```
pub fn rewrite_links(html: &str, page_url: &Url, page_path: &Path, map: &LinkMap) -> (String, usize) {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);

    // raw attribute value -> replacement
    let mut replacements: BTreeMap<String, String> = BTreeMap::new();
    for attribute in LINK_ATTRIBUTES {
        let Ok(selector) = Selector::parse(&format!("[{}]", attribute)) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attribute) else {
                continue;
            };
            if replacements.contains_key(raw) {
                continue;
            }
            if let Some(local) = local_target(raw, &base, page_path, map) {
                replacements.insert(raw.to_string(), local);
            }
        }
    }

    let mut output = html.to_string();
    let mut changed = 0;
    for (raw, local) in &replacements {
        let encoded = raw.replace('&', "&amp;");
        let mut forms = vec![raw.as_str()];
        if encoded != *raw {
            forms.push(encoded.as_str());
        }

        for attribute in LINK_ATTRIBUTES {
            for quote in ['"', '\''] {
                for form in &forms {
                    let needle = format!("{}={}{}{}", attribute, quote, form, quote);
                    let hits = output.matches(&needle).count();
                    if hits > 0 {
                        let replacement = format!("{}={}{}{}", attribute, quote, local, quote);
                        output = output.replace(&needle, &replacement);
                        changed += hits;
                    }
                }
            }
        }
    }

    (output, changed)
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|base| base.value().attr("href"))
                .and_then(|href| page_url.join(href).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Relative link for `raw` if it points at something in the copy
fn local_target(raw: &str, base: &Url, page_path: &Path, map: &LinkMap) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let absolute = base.join(trimmed).ok()?;
    if !matches!(absolute.scheme(), "http" | "https") {
        return None;
    }
    let fragment = absolute.fragment().map(str::to_string);
    let key = normalize_url(absolute.as_str()).ok()?;
    let target = map.get(key.as_str())?;

    let mut link = relative_link(page_path, target);
    if let Some(fragment) = fragment {
        link.push('#');
        link.push_str(&fragment);
    }
    Some(link)
}

/// Rewrites every saved page in place
///
/// # Arguments
///
/// * `output_dir` - Root of the offline copy
/// * `pages` - `(page URL, local path)` of every cloned page
/// * `map` - Every cloned page and captured asset
pub async fn fix_links(
    output_dir: &Path,
    pages: &[(Url, PathBuf)],
    map: &LinkMap,
) -> io::Result<LinkFixReport> {
    let mut report = LinkFixReport::default();

    for (url, local_path) in pages {
        let file = output_dir.join(local_path);
        let html = match tokio::fs::read_to_string(&file).await {
            Ok(html) => html,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.pages_missing += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let (rewritten, changed) = rewrite_links(&html, url, local_path, map);
        if changed > 0 && rewritten != html {
            write_atomic(&file, rewritten.as_bytes()).await?;
            report.pages_rewritten += 1;
            report.links_rewritten += changed;
            debug!(url = %url, links = changed, "Rewrote links");
        }
    }

    info!(
        "Link fixing rewrote {} link(s) in {} page(s)",
        report.links_rewritten, report.pages_rewritten
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map() -> LinkMap {
        let mut map = LinkMap::new();
        map.insert("https://x.com/", "x.com/index.html");
        map.insert("https://x.com/docs/a", "x.com/docs/a/index.html");
        map.insert("https://x.com/img/logo.png", "_assets/x.com/img/logo.png");
        map
    }

    #[test]
    fn test_rewrites_pages_and_assets() {
        let html = r#"<html><body>
            <a href="/docs/a">A</a>
            <a href='https://x.com/#top'>Home</a>
            <a href="https://elsewhere.com/">Out</a>
            <a href="/not-cloned">Missing</a>
            <img src="../img/logo.png">
        </body></html>"#;
        let page = Url::parse("https://x.com/docs/b").unwrap();
        let (out, changed) =
            rewrite_links(html, &page, Path::new("x.com/docs/b/index.html"), &map());

        assert_eq!(changed, 3);
        assert!(out.contains(r#"href="../a/index.html""#));
        assert!(out.contains(r#"href='../../index.html#top'"#));
        assert!(out.contains(r#"src="../../../_assets/x.com/img/logo.png""#));
        assert!(out.contains(r#"href="https://elsewhere.com/""#));
        assert!(out.contains(r#"href="/not-cloned""#));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let html = r#"<a href="/docs/a">A</a>"#;
        let page = Url::parse("https://x.com/").unwrap();
        let path = Path::new("x.com/index.html");

        let (once, first) = rewrite_links(html, &page, path, &map());
        let (twice, second) = rewrite_links(&once, &page, path, &map());
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_entity_encoded_query() {
        let mut map = LinkMap::new();
        map.insert("https://x.com/list?a=1&b=2", "x.com/list/index_abc.html");
        let html = r#"<a href="/list?a=1&amp;b=2">List</a>"#;
        let page = Url::parse("https://x.com/").unwrap();
        let (out, changed) = rewrite_links(html, &page, Path::new("x.com/index.html"), &map);
        assert_eq!(changed, 1);
        assert!(out.contains(r#"href="list/index_abc.html""#));
    }

    #[tokio::test]
    async fn test_fix_links_on_disk() {
        let dir = TempDir::new().unwrap();
        let page_path = PathBuf::from("x.com/index.html");
        write_atomic(
            &dir.path().join(&page_path),
            br#"<a href="/docs/a">A</a>"#,
        )
        .await
        .unwrap();

        let pages = vec![
            (Url::parse("https://x.com/").unwrap(), page_path.clone()),
            (
                Url::parse("https://x.com/docs/a").unwrap(),
                PathBuf::from("x.com/docs/a/index.html"),
            ),
        ];
        let report = fix_links(dir.path(), &pages, &map()).await.unwrap();

        assert_eq!(report.pages_rewritten, 1);
        assert_eq!(report.links_rewritten, 1);
        assert_eq!(report.pages_missing, 1);

        let saved = tokio::fs::read_to_string(dir.path().join(&page_path))
            .await
            .unwrap();
        assert_eq!(saved, r#"<a href="docs/a/index.html">A</a>"#);
    }
}
