//! State module for tracking clone progress
//!
//! # Components
//!
//! - `JobPhase`: the per-job state machine (initializing, crawling, exporting, ...)
//! - `PageStatus`: the outcome of a single page task

mod job_phase;
mod page_state;

// Re-export main types
pub use job_phase::JobPhase;
pub use page_state::PageStatus;
