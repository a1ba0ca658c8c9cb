//! HTML parser for extracting links to follow
//!
//! Links come from `<a>` tags and canonical `<link>` elements.
//!
//! Asset references (images, scripts, stylesheets) are extracted separately by
//! [`crate::assets::extract_asset_urls`].

use crate::url::resolve_link;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Normalized, de-duplicated link targets in document order
    pub links: Vec<Url>,
}

/// Parses HTML content and extracts the links to follow
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
/// - Non-HTTP(S) URLs after resolution
///
/// Fragments are stripped, so `/a#s1` and `/a#s2` produce a single link.
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
///
/// # Example
///
/// ```
/// use sumi_mirror::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, base_url);

    ParsedPage {
        links: collect_links(&document, &base),
    }
}

/// Convenience function for extracting just the links from HTML
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    parse_html(html, base_url).links
}

/// Honors `<base href>` when present
fn document_base(document: &Html, base_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return base_url.clone();
    };
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| base_url.join(href.trim()).ok())
        .unwrap_or_else(|| base_url.clone())
}

fn collect_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(url) = resolve_link(href, base_url) {
            if matches!(url.scheme(), "http" | "https") && seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}
