//! Task queue between the dispatcher and the workers

use crate::crawler::{FrontierItem, PageContext, PageOutcome};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// One page for a worker to clone
pub struct WorkTask {
    pub item: FrontierItem,
    pub ctx: Arc<PageContext>,
    /// Receives the page outcome
    pub reply: oneshot::Sender<Result<PageOutcome>>,
}

/// Queue of page tasks shared by every worker
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a task, handing it back if the queue is closed
    async fn submit(&self, task: WorkTask) -> std::result::Result<(), WorkTask>;

    /// Waits for the next task; `None` once the queue is closed and drained
    async fn next_task(&self) -> Option<WorkTask>;

    /// Stops accepting tasks; queued tasks are still handed out
    fn close(&self);

    /// Tasks waiting for a worker
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process queue over a tokio channel
pub struct ChannelTaskQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<WorkTask>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkTask>>,
    queued: AtomicUsize,
}

impl ChannelTaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            queued: AtomicUsize::new(0),
        }
    }
}

impl Default for ChannelTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn submit(&self, task: WorkTask) -> std::result::Result<(), WorkTask> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                tx.send(task).map_err(|e| {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    e.0
                })
            }
            None => Err(task),
        }
    }

    async fn next_task(&self) -> Option<WorkTask> {
        let task = self.rx.lock().await.recv().await;
        if task.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}
