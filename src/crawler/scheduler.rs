//! Crawl frontier and budget enforcement
//!
//! This module handles:
//! - Priority ordering of discovered URLs (priority first, then discovery order)
//! - Same-origin filtering and fragment-insensitive de-duplication
//! - The depth ceiling, page budget and elapsed-time budget

use crate::checkpoint::PendingUrl;
use crate::config::ResolvedOptions;
use crate::crawler::discovery::RobotsRules;
use crate::url::{normalize_url, same_origin};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

/// Priority of the root URL
pub const ROOT_PRIORITY: f64 = 1.0;

/// Priority given to sitemap entries without an explicit `<priority>`
pub const SITEMAP_DEFAULT_PRIORITY: f64 = 0.8;

/// Base priority of links discovered while crawling
pub const LINK_PRIORITY: f64 = 0.5;

/// Per-level decay applied to a base priority
pub const DEPTH_DECAY: f64 = 0.85;

/// Returns `base` decayed by `depth` levels
///
/// ```
/// use sumi_mirror::crawler::{decayed_priority, DEPTH_DECAY};
///
/// assert_eq!(decayed_priority(0.8, 0), 0.8);
/// assert!((decayed_priority(0.8, 1) - 0.8 * DEPTH_DECAY).abs() < 1e-9);
/// ```
pub fn decayed_priority(base: f64, depth: u32) -> f64 {
    base * DEPTH_DECAY.powi(depth.min(i32::MAX as u32) as i32)
}

/// A URL waiting to be cloned
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierItem {
    /// Normalized (fragment-free) URL
    pub url: Url,

    /// Link distance from the root URL
    pub depth: u32,

    /// Higher values are dequeued first
    pub priority: f64,
}

impl FrontierItem {
    /// Dedup key of this item
    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    /// Converts to the checkpoint representation
    pub fn to_pending(&self) -> PendingUrl {
        PendingUrl {
            url: self.url.to_string(),
            depth: self.depth,
            priority: self.priority,
        }
    }
}

/// A frontier item plus its discovery sequence number
#[derive(Debug, Clone)]
struct QueuedItem {
    item: FrontierItem,
    seq: u64,
}

// Higher priority pops first from the max-heap; equal priorities pop in
// discovery order (lower sequence first)
impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .total_cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedItem {}

/// Budgets enforced by the scheduler; `None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerLimits {
    pub max_pages: Option<usize>,
    pub max_depth: Option<u32>,
    pub time_limit: Option<Duration>,
}

impl From<&ResolvedOptions> for SchedulerLimits {
    fn from(options: &ResolvedOptions) -> Self {
        Self {
            max_pages: options.max_pages,
            max_depth: options.max_depth,
            time_limit: options.time_limit,
        }
    }
}

/// Why [`CrawlScheduler::dequeue_batch`] stopped handing out work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing dequeueable is left
    FrontierExhausted,

    /// The completed-page counter reached `max_pages`
    PageBudget,

    /// The elapsed-time budget ran out
    TimeBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FrontierExhausted => "frontier exhausted",
            Self::PageBudget => "page limit reached",
            Self::TimeBudget => "time limit reached",
        })
    }
}

/// Outcome of an [`CrawlScheduler::enqueue`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added to the dequeueable frontier
    Queued,

    /// Accepted but deeper than the depth ceiling; kept for the checkpoint only
    Parked,

    /// Already queued, in flight, completed or failed
    Duplicate,

    /// Different origin from the root URL
    OffOrigin,

    /// Disallowed by robots.txt
    Disallowed,

    /// Not a valid http(s) URL
    Invalid,
}

impl EnqueueOutcome {
    /// True if the URL is now tracked by the frontier
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Queued | Self::Parked)
    }
}

/// The URL frontier for one clone job
///
/// Every URL is tracked under its normalized form, so two URLs that differ only
/// by fragment are one entry. A URL is in at most one of queued, in flight,
/// completed or failed.
#[derive(Debug)]
pub struct CrawlScheduler {
    root: Url,
    limits: SchedulerLimits,
    frontier: BinaryHeap<QueuedItem>,
    /// Deeper than the depth ceiling; never dequeued
    parked: Vec<QueuedItem>,
    queued: HashSet<String>,
    in_flight: HashMap<String, FrontierItem>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    robots: Option<RobotsRules>,
    next_seq: u64,
    started: Instant,
    stop_reason: Option<StopReason>,
}

impl CrawlScheduler {
    /// Creates an empty scheduler for the site rooted at `root`
    ///
    /// # Arguments
    ///
    /// * `root` - Normalized root URL; only same-origin URLs are accepted
    /// * `limits` - Page, depth and time budgets
    pub fn new(root: Url, limits: SchedulerLimits) -> Self {
        Self {
            root,
            limits,
            frontier: BinaryHeap::new(),
            parked: Vec::new(),
            queued: HashSet::new(),
            in_flight: HashMap::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            robots: None,
            next_seq: 0,
            started: Instant::now(),
            stop_reason: None,
        }
    }

    /// Filters every future enqueue through robots.txt rules
    pub fn with_robots(mut self, robots: RobotsRules) -> Self {
        self.set_robots(robots);
        self
    }

    /// Installs robots.txt rules after construction (e.g. once discovery ran)
    pub fn set_robots(&mut self, robots: RobotsRules) {
        self.robots = Some(robots);
    }

    /// Sets the instant the time budget is measured from
    pub fn with_start(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    /// Adds a URL to the frontier
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL; it is normalized (fragment stripped) first
    /// * `depth` - Link distance from the root
    /// * `priority` - Higher is dequeued sooner
    ///
    /// # Returns
    ///
    /// What happened to the URL; see [`EnqueueOutcome`]
    pub fn enqueue(&mut self, url: &str, depth: u32, priority: f64) -> EnqueueOutcome {
        let url = match normalize_url(url) {
            Ok(url) => url,
            Err(e) => {
                trace!("Rejected {}: {}", url, e);
                return EnqueueOutcome::Invalid;
            }
        };

        if !same_origin(&url, &self.root) {
            return EnqueueOutcome::OffOrigin;
        }

        let key = url.as_str();
        if self.queued.contains(key)
            || self.in_flight.contains_key(key)
            || self.completed.contains(key)
            || self.failed.contains(key)
        {
            return EnqueueOutcome::Duplicate;
        }

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(&url) {
                debug!(url = %url, "Disallowed by robots.txt");
                return EnqueueOutcome::Disallowed;
            }
        }

        self.queued.insert(key.to_string());
        let queued = QueuedItem {
            item: FrontierItem {
                url,
                depth,
                priority,
            },
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if self.limits.max_depth.map_or(false, |max| depth > max) {
            trace!(url = %queued.item.url, depth, "Parked beyond depth ceiling");
            self.parked.push(queued);
            EnqueueOutcome::Parked
        } else {
            self.frontier.push(queued);
            EnqueueOutcome::Queued
        }
    }

    /// Removes up to `n` items, highest priority first
    ///
    /// Returns an empty batch once the page budget is reached (counting pages
    /// still in flight), the time budget has elapsed, or nothing dequeueable is
    /// left; [`stop_reason`](Self::stop_reason) then says which.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<FrontierItem> {
        if self.time_exceeded() {
            self.stop_reason = Some(StopReason::TimeBudget);
            return Vec::new();
        }

        let mut take = n;
        if let Some(max_pages) = self.limits.max_pages {
            if self.completed.len() >= max_pages {
                self.stop_reason = Some(StopReason::PageBudget);
                return Vec::new();
            }
            let remaining =
                max_pages.saturating_sub(self.completed.len() + self.in_flight.len());
            take = take.min(remaining);
        }

        let mut batch = Vec::with_capacity(take);
        while batch.len() < take {
            let Some(queued) = self.frontier.pop() else {
                break;
            };
            let key = queued.item.key().to_string();
            self.queued.remove(&key);
            self.in_flight.insert(key, queued.item.clone());
            batch.push(queued.item);
        }

        if batch.is_empty() && self.in_flight.is_empty() {
            self.stop_reason = Some(StopReason::FrontierExhausted);
        } else {
            self.stop_reason = None;
        }

        batch
    }

    /// Why the last [`dequeue_batch`](Self::dequeue_batch) returned nothing
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Returns true if the elapsed-time budget has run out
    pub fn time_exceeded(&self) -> bool {
        self.limits
            .time_limit
            .map_or(false, |limit| self.started.elapsed() >= limit)
    }

    /// Time since the scheduler started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Marks an in-flight URL as cloned
    pub fn record_completed(&mut self, url: &str) {
        self.in_flight.remove(url);
        self.queued.remove(url);
        self.completed.insert(url.to_string());
    }

    /// Marks an in-flight URL as failed; it is never handed out again
    pub fn record_failed(&mut self, url: &str) {
        self.in_flight.remove(url);
        self.queued.remove(url);
        self.failed.insert(url.to_string());
    }

    /// Seeds the completed set from a checkpoint
    pub fn restore_completed<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completed.extend(urls.into_iter().map(Into::into));
    }

    /// Seeds the failed set from a checkpoint
    pub fn restore_failed<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failed.extend(urls.into_iter().map(Into::into));
    }

    /// Every URL not yet settled, in the order it would be processed:
    /// in flight first, then the frontier by priority, then parked items
    pub fn snapshot(&self) -> Vec<PendingUrl> {
        let mut in_flight: Vec<&FrontierItem> = self.in_flight.values().collect();
        in_flight.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        let mut queued: Vec<&QueuedItem> = self.frontier.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));

        in_flight
            .into_iter()
            .chain(queued.into_iter().map(|q| &q.item))
            .chain(self.parked.iter().map(|q| &q.item))
            .map(FrontierItem::to_pending)
            .collect()
    }

    /// Number of dequeueable URLs
    pub fn frontier_size(&self) -> usize {
        self.frontier.len()
    }

    /// Number of URLs beyond the depth ceiling
    pub fn parked_size(&self) -> usize {
        self.parked.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// True if nothing is queued (parked items do not count)
    pub fn is_empty(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Best-effort total for progress reporting
    pub fn total_estimate(&self) -> usize {
        let known = self.completed.len() + self.in_flight.len() + self.frontier.len();
        match self.limits.max_pages {
            Some(max) => known.min(max),
            None => known,
        }
    }
}
