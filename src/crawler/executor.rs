//! Batch dispatch
//!
//! A [`Dispatcher`] runs one batch of page tasks and returns when every task
//! has finished. [`LocalExecutor`] runs them on the local runtime under a
//! concurrency semaphore; the distributed executor hands them to workers.

use crate::crawler::page_task::{process_page, PageContext, PageOutcome};
use crate::crawler::scheduler::FrontierItem;
use crate::{MirrorError, PageError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Runs batches of page tasks
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Processes every item and returns their outcomes (in completion order)
    ///
    /// An `Err` means a job-fatal failure in at least one task; the other
    /// tasks of the batch still ran to completion.
    async fn dispatch(
        &self,
        ctx: Arc<PageContext>,
        batch: Vec<FrontierItem>,
    ) -> Result<Vec<PageOutcome>>;

    /// Upper bound on concurrently running page tasks
    fn concurrency(&self) -> usize;
}

/// Runs page tasks as local tokio tasks
pub struct LocalExecutor {
    limit: Arc<Semaphore>,
    concurrency: usize,
}

impl LocalExecutor {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            limit: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }
}

#[async_trait]
impl Dispatcher for LocalExecutor {
    async fn dispatch(
        &self,
        ctx: Arc<PageContext>,
        batch: Vec<FrontierItem>,
    ) -> Result<Vec<PageOutcome>> {
        debug!("Dispatching {} page(s) locally", batch.len());

        let mut tasks = JoinSet::new();
        for item in batch {
            let ctx = Arc::clone(&ctx);
            let limit = Arc::clone(&self.limit);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = limit
                    .acquire_owned()
                    .await
                    .map_err(|_| PageError::ResourcePoolExhausted(Duration::ZERO))?;
                process_page(&ctx, item).await
            });
        }

        collect(tasks).await
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Drains a set of page tasks, keeping the first fatal error
pub(crate) async fn collect(mut tasks: JoinSet<Result<PageOutcome>>) -> Result<Vec<PageOutcome>> {
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut fatal = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(e)) => {
                fatal.get_or_insert(e);
            }
            Err(e) => {
                fatal.get_or_insert(MirrorError::Join(e));
            }
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(outcomes),
    }
}
