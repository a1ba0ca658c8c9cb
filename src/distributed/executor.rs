//! Dispatching page batches to workers

use crate::config::DistributedSettings;
use crate::crawler::{
    collect_outcomes, process_page, Dispatcher, FrontierItem, LocalExecutor, PageContext,
    PageFailure, PageOutcome,
};
use crate::distributed::queue::{ChannelTaskQueue, TaskQueue, WorkTask};
use crate::distributed::{WorkerRecord, WorkerRegistry};
use crate::{PageError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// [`Dispatcher`] that hands page tasks to workers through a [`TaskQueue`]
///
/// Falls back to running a batch locally when no worker is online, so a job
/// never stalls on an empty worker pool.
pub struct DistributedExecutor {
    registry: Arc<WorkerRegistry>,
    queue: Arc<dyn TaskQueue>,
}

impl DistributedExecutor {
    /// Dispatches through `queue`; workers attach themselves via [`run_worker`]
    pub fn new(registry: Arc<WorkerRegistry>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { registry, queue }
    }

    /// Starts `settings.workers` in-process workers on an in-process queue
    pub fn spawn_local(settings: &DistributedSettings) -> Self {
        let registry = Arc::new(WorkerRegistry::new(Duration::from_secs(
            settings.heartbeat_timeout_secs.max(1),
        )));
        let queue: Arc<dyn TaskQueue> = Arc::new(ChannelTaskQueue::new());

        for i in 0..settings.workers.max(1) {
            let record = WorkerRecord::new(
                format!("local-{}", i),
                "127.0.0.1",
                0,
                settings.worker_capacity,
            );
            // Registered before the task starts so the first batch sees it
            registry.register(record.clone());
            tokio::spawn(run_worker(
                record,
                Arc::clone(&registry),
                Arc::clone(&queue),
            ));
        }

        Self { registry, queue }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }
}

impl Drop for DistributedExecutor {
    fn drop(&mut self) {
        // Workers exit once the closed queue is drained
        self.queue.close();
    }
}

#[async_trait]
impl Dispatcher for DistributedExecutor {
    async fn dispatch(
        &self,
        ctx: Arc<PageContext>,
        batch: Vec<FrontierItem>,
    ) -> Result<Vec<PageOutcome>> {
        if self.registry.online_count() == 0 {
            warn!("No worker online; running {} page(s) locally", batch.len());
            return LocalExecutor::new(batch.len()).dispatch(ctx, batch).await;
        }
        debug!(
            "Queueing {} page(s) for {} worker(s)",
            batch.len(),
            self.registry.online_count()
        );

        let mut tasks = JoinSet::new();
        for item in batch {
            let (reply, receiver) = oneshot::channel();
            let task = WorkTask {
                item: item.clone(),
                ctx: Arc::clone(&ctx),
                reply,
            };

            if let Err(task) = self.queue.submit(task).await {
                tasks.spawn(async move { process_page(&task.ctx, task.item).await });
                continue;
            }

            tasks.spawn(async move {
                match receiver.await {
                    Ok(outcome) => outcome,
                    Err(_) => Ok(lost(item)),
                }
            });
        }

        collect_outcomes(tasks).await
    }

    fn concurrency(&self) -> usize {
        self.registry.online_capacity().max(1)
    }
}

/// Outcome for a task whose worker went away before replying
fn lost(item: FrontierItem) -> PageOutcome {
    warn!(url = %item.url, "Worker dropped the task");
    let url = item.url.to_string();
    PageOutcome {
        item,
        result: Err(PageFailure {
            error: PageError::TargetClosed { url },
            attempts: 0,
            permanent: false,
        }),
    }
}

/// Worker loop: pulls tasks from `queue` until it is closed and drained
///
/// Runs at most `record.capacity` pages at once and heartbeats into
/// `registry` at a third of the heartbeat timeout.
pub async fn run_worker(
    record: WorkerRecord,
    registry: Arc<WorkerRegistry>,
    queue: Arc<dyn TaskQueue>,
) {
    let id = record.id.clone();
    let slots = Arc::new(Semaphore::new(record.capacity.max(1)));
    registry.register(record);

    let beat = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        let every = (registry.heartbeat_timeout() / 3).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                registry.heartbeat(&id);
            }
        })
    };

    let mut running = JoinSet::new();
    loop {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let Some(task) = queue.next_task().await else {
            break;
        };

        registry.begin_task(&id);
        let registry = Arc::clone(&registry);
        let id = id.clone();
        running.spawn(async move {
            let WorkTask { item, ctx, reply } = task;
            let outcome = process_page(&ctx, item).await;
            // The dispatcher may have given up on the batch
            let _ = reply.send(outcome);
            registry.finish_task(&id);
            drop(permit);
        });
    }

    while running.join_next().await.is_some() {}
    beat.abort();
    registry.deregister(&id);
}
