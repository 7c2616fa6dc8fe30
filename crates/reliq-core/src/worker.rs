//! WorkerGroup - async handler でキューを消費する tokio タスク群
//!
//! QueueManager の API は同期（blocking）なので、delivery の取得は
//! `spawn_blocking` で行い、handler の実行だけを async にする。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::Outcome;
use crate::manager::QueueManager;
use crate::ports::Codec;

/// How long one lease attempt blocks before re-checking for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consumes one item.
///
/// Returning a failure (or panicking) sends the item to the retry partition.
#[async_trait]
pub trait ItemHandler<T: Send + Sync + 'static>: Send + Sync + 'static {
    async fn handle(&self, item: &T) -> Outcome;
}

/// Worker group handle.
/// - `request_shutdown()` で新しい delivery の取得をやめる
/// - `shutdown_and_join()` で実行中の handler の完了まで待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers on the current tokio runtime.
    pub fn spawn<T, C, H>(n: usize, queue: Arc<QueueManager<T, C>>, handler: Arc<H>) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Codec,
        H: ItemHandler<T>,
    {
        Self::spawn_with_poll_interval(n, queue, handler, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_poll_interval<T, C, H>(
        n: usize,
        queue: Arc<QueueManager<T, C>>,
        handler: Arc<H>,
        poll_interval: Duration,
    ) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Codec,
        H: ItemHandler<T>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, queue, handler, rx, poll_interval))
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight handlers are not cancelled; workers just stop taking new
    /// deliveries.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

async fn worker_loop<T, C, H>(
    worker_id: usize,
    queue: Arc<QueueManager<T, C>>,
    handler: Arc<H>,
    shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Codec,
    H: ItemHandler<T>,
{
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // take_timeout は blocking なので runtime のスレッドを塞がない
        let leased = tokio::task::spawn_blocking({
            let queue = Arc::clone(&queue);
            move || queue.take_timeout(poll_interval)
        })
        .await;
        let delivery = match leased {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "lease task failed");
                continue;
            }
        };

        // handler は別タスクで動かす。panic しても delivery の drop で retry に移る
        let handler = Arc::clone(&handler);
        let run = tokio::spawn(async move {
            let outcome = handler.handle(delivery.item()).await;
            let key = delivery.key().clone();
            if let Err(e) = delivery.settle(&outcome) {
                error!(worker_id, %key, error = %e, "cannot settle item");
            }
        });
        if let Err(e) = run.await
            && e.is_panic()
        {
            warn!(worker_id, "handler panicked, item moved to retry");
        }
    }
    debug!(worker_id, "worker stopped");
}
