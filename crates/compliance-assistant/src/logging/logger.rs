use flume::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;
use crate::config::ActivityLogConfig;
use crate::database::Storage;

/// Async activity logger with queue mechanism
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<Sender<ActivityLog>>,
}

impl ActivityLogger {
    /// Initialize logger with background workers flushing into `storage`.
    pub fn new(storage: Arc<dyn Storage>, config: ActivityLogConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count.max(1) {
            let storage = storage.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, storage, receiver, config).await;
            });
        }

        Self {
            sender: Some(sender),
        }
    }

    /// Logger that drops every entry; for tools and tests that have no audit sink.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(
        worker_id: usize,
        storage: Arc<dyn Storage>,
        receiver: Receiver<ActivityLog>,
        config: ActivityLogConfig,
    ) {
        info!("Activity log worker {} started", worker_id);

        let batch_size = config.batch_size.max(1);
        let mut batch: Vec<ActivityLog> = Vec::with_capacity(batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        // Channel closed, flush and exit
                        if !batch.is_empty() {
                            Self::flush_batch(storage.as_ref(), &batch, worker_id).await;
                        }
                        info!("Activity log worker {} shutting down (channel closed)", worker_id);
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush_batch(storage.as_ref(), &batch, worker_id).await;
                batch.clear();
            } else {
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    async fn flush_batch(storage: &dyn Storage, batch: &[ActivityLog], worker_id: usize) {
        let start = std::time::Instant::now();

        match storage.insert_activity_logs(batch).await {
            Ok(inserted) => {
                debug!(
                    "Worker {} inserted {} activity logs in {:?}",
                    worker_id,
                    inserted,
                    start.elapsed()
                );
            }
            Err(e) => {
                error!("Worker {} failed to insert activity batch: {}", worker_id, e);
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.sender.as_ref().map(|s| s.len()).unwrap_or(0)
    }
}
