//! Crawling a site into an offline copy
//!
//! This module contains the clone pipeline:
//! - Seed discovery from robots.txt and sitemaps
//! - The priority frontier and its limits
//! - Per-page rendering, caching and asset capture
//! - Batch dispatch, local or across workers
//! - Post-crawl link rewriting
//! - Overall job orchestration and checkpointing

mod discovery;
mod executor;
mod link_fixer;
mod orchestrator;
mod page_task;
mod parser;
mod progress;
mod scheduler;

pub use discovery::{
    discover, parse_sitemap, sitemap_directives, Discovery, ParsedSitemap, RobotsRules,
    SitemapEntry,
};
pub(crate) use executor::collect as collect_outcomes;
pub use executor::{Dispatcher, LocalExecutor};
pub use link_fixer::{fix_links, rewrite_links, LinkFixReport, LinkMap};
pub use orchestrator::{run_clone, CloneSummary, Orchestrator, ResumeMode};
pub use page_task::{process_page, PageContext, PageFailure, PageOutcome, PageSuccess};
pub use parser::{extract_links, parse_html, ParsedPage};
pub use progress::{channel, ProgressEvent, ProgressSender, ProgressStatus, RECENT_FILES};
pub use scheduler::{
    decayed_priority, CrawlScheduler, EnqueueOutcome, FrontierItem, SchedulerLimits, StopReason,
    DEPTH_DECAY, LINK_PRIORITY, ROOT_PRIORITY, SITEMAP_DEFAULT_PRIORITY,
};
