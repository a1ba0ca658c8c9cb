//! Frontier seeding from robots.txt and sitemaps
//!
//! Discovery is best effort: a missing robots.txt, an unreachable sitemap or a
//! malformed document only means fewer seeds, never a failed job.

use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Upper bound on sitemap documents fetched per job, nested ones included
const MAX_SITEMAPS: usize = 8;

/// Parsed robots.txt for one origin
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
    user_agent: String,
}

impl RobotsRules {
    /// Creates rules from raw robots.txt content
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt file content
    /// * `user_agent` - The agent the rules are evaluated for
    pub fn new(content: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Checks if a URL may be fetched
    ///
    /// Empty content allows everything.
    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.user_agent, url.as_str())
    }

    /// `Sitemap:` directives, in file order
    pub fn sitemaps(&self) -> Vec<String> {
        sitemap_directives(&self.content)
    }
}

/// Extracts `Sitemap:` directive values from robots.txt content
pub fn sitemap_directives(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if !key.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

/// One `<url>` entry of a sitemap
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub url: String,
    /// `<priority>` clamped to `[0, 1]`, if present and numeric
    pub priority: Option<f64>,
}

/// Contents of one sitemap document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSitemap {
    pub entries: Vec<SitemapEntry>,
    /// `<sitemap><loc>` children of a sitemap index
    pub nested: Vec<String>,
}

/// Parses a sitemap or sitemap index document
///
/// ```
/// use sumi_mirror::crawler::parse_sitemap;
///
/// let xml = r#"<urlset>
///   <url><loc>https://example.com/a</loc><priority>0.9</priority></url>
///   <url><loc>https://example.com/b?x=1&amp;y=2</loc></url>
/// </urlset>"#;
/// let parsed = parse_sitemap(xml);
/// assert_eq!(parsed.entries.len(), 2);
/// assert_eq!(parsed.entries[0].priority, Some(0.9));
/// assert_eq!(parsed.entries[1].url, "https://example.com/b?x=1&y=2");
/// ```
pub fn parse_sitemap(xml: &str) -> ParsedSitemap {
    let mut parsed = ParsedSitemap::default();

    for block in elements(xml, "url") {
        let Some(loc) = elements(block, "loc").into_iter().next() else {
            continue;
        };
        let loc = unescape(loc.trim());
        if loc.is_empty() {
            continue;
        }
        let priority = elements(block, "priority")
            .into_iter()
            .next()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 1.0));
        parsed.entries.push(SitemapEntry { url: loc, priority });
    }

    for block in elements(xml, "sitemap") {
        if let Some(loc) = elements(block, "loc").into_iter().next() {
            let loc = unescape(loc.trim());
            if !loc.is_empty() {
                parsed.nested.push(loc);
            }
        }
    }

    parsed
}

/// Inner text of every `<tag>...</tag>` (attributes allowed) in `xml`
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open_plain = format!("<{}>", tag);
    let open_attr = format!("<{} ", tag);
    let close = format!("</{}>", tag);

    let mut out = Vec::new();
    let mut rest = xml;
    loop {
        let start = match (rest.find(&open_plain), rest.find(&open_attr)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => break,
        };
        let Some(gt) = rest[start..].find('>') else {
            break;
        };
        let body_start = start + gt + 1;
        let Some(end) = rest[body_start..].find(&close) else {
            break;
        };
        out.push(&rest[body_start..body_start + end]);
        rest = &rest[body_start + end + close.len()..];
    }
    out
}

fn unescape(text: &str) -> String {
    let text = text
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>");
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// What discovery found for a site
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Present when robots.txt was fetched successfully
    pub robots: Option<RobotsRules>,
    /// Same-origin sitemap entries, de-duplicated
    pub entries: Vec<SitemapEntry>,
    /// Number of sitemap documents that parsed
    pub sitemaps_read: usize,
}

/// Fetches robots.txt and every sitemap it names (or `/sitemap.xml`)
///
/// # Arguments
///
/// * `client` - HTTP client carrying the job's identity
/// * `root` - Root URL of the clone; only same-origin entries are kept
/// * `user_agent` - Agent robots.txt rules are evaluated for
/// * `timeout` - Per-request timeout
pub async fn discover(
    client: &Client,
    root: &Url,
    user_agent: &str,
    timeout: Duration,
) -> Discovery {
    let mut discovery = Discovery::default();

    let mut sources = Vec::new();
    if let Ok(robots_url) = root.join("/robots.txt") {
        match fetch_text(client, &robots_url, timeout).await {
            Some(content) => {
                let rules = RobotsRules::new(content, user_agent);
                sources.extend(rules.sitemaps());
                discovery.robots = Some(rules);
            }
            None => debug!("No robots.txt at {}", robots_url),
        }
    }
    if sources.is_empty() {
        if let Ok(default) = root.join("/sitemap.xml") {
            sources.push(default.to_string());
        }
    }

    let mut seen_entries = HashSet::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<(String, u8)> = sources.into_iter().map(|s| (s, 0)).collect();

    while let Some((source, level)) = queue.pop_front() {
        if visited.len() >= MAX_SITEMAPS || !visited.insert(source.clone()) {
            continue;
        }
        let Ok(url) = root.join(&source) else {
            continue;
        };
        let Some(xml) = fetch_text(client, &url, timeout).await else {
            debug!("Sitemap {} unavailable", url);
            continue;
        };

        let parsed = parse_sitemap(&xml);
        discovery.sitemaps_read += 1;

        for entry in parsed.entries {
            let same = Url::parse(&entry.url)
                .map(|u| u.origin() == root.origin())
                .unwrap_or(false);
            if same && seen_entries.insert(entry.url.clone()) {
                discovery.entries.push(entry);
            }
        }

        // Indexes are followed one level deep
        if level == 0 {
            queue.extend(parsed.nested.into_iter().map(|n| (n, 1)));
        }
    }

    info!(
        "Discovery found {} sitemap entries in {} sitemap(s)",
        discovery.entries.len(),
        discovery.sitemaps_read
    );
    discovery
}

async fn fetch_text(client: &Client, url: &Url, timeout: Duration) -> Option<String> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}
