// ABOUTME: Worker loop: poll the common queue, then the private queue, then sleep, forever.
// ABOUTME: Every popped item yields exactly one response envelope on its response queue.

use crate::identity::WorkerId;
use crate::metrics;
use crate::protocol::{ErrorInfo, QueueItem, ResponseEnvelope};
use crate::queue::{worker_queue, Queue, QueueError, COMMON_QUEUE};
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use promptq_agent::{AskRequest, SharedBackend};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Fixed delay between cycles, whether or not work was found
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Which polls in a cycle found an item
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub common: bool,
    pub own: bool,
}

pub struct Worker {
    id: WorkerId,
    own_queue: String,
    queue: Queue,
    backend: SharedBackend,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(id: WorkerId, queue: Queue, backend: SharedBackend, config: WorkerConfig) -> Self {
        Self {
            own_queue: worker_queue(&id),
            id,
            queue,
            backend,
            config,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn own_queue(&self) -> &str {
        &self.own_queue
    }

    /// Establish the initial backend session. An error here should end the process.
    pub async fn start(&self) -> Result<()> {
        self.backend
            .start_session()
            .await
            .with_context(|| format!("Failed to start {} backend session", self.backend.name()))?;
        tracing::info!(
            worker_id = %self.id,
            backend = self.backend.name(),
            "Backend session established"
        );
        Ok(())
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id = %self.id,
            own_queue = %self.own_queue,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker listening"
        );
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// One common-queue poll followed by one own-queue poll. Errors are logged, not returned.
    pub async fn run_cycle(&self) -> CycleReport {
        CycleReport {
            common: self.poll_logged(COMMON_QUEUE).await,
            own: self.poll_logged(&self.own_queue).await,
        }
    }

    async fn poll_logged(&self, queue_name: &str) -> bool {
        match self.poll_queue(queue_name).await {
            Ok(handled) => handled,
            Err(QueueError::Malformed { queue, source }) => {
                metrics::record_malformed_item();
                tracing::error!(queue = %queue, error = %source, "Dropping malformed queue item");
                false
            }
            Err(e) => {
                tracing::warn!(queue = %queue_name, error = %e, "Queue poll failed");
                false
            }
        }
    }

    /// Pop at most one item from `queue_name`, handle it, and publish its envelope.
    ///
    /// Returns whether an item was handled. The popped item is never returned to the queue.
    pub async fn poll_queue(&self, queue_name: &str) -> Result<bool, QueueError> {
        let Some(item) = self.queue.pop::<QueueItem>(queue_name).await? else {
            return Ok(false);
        };

        let envelope = self.handle(&item).await;
        if let Err(e) = self.queue.push(&item.response_queue_name, &envelope).await {
            tracing::error!(
                worker_id = %self.id,
                response_queue = %item.response_queue_name,
                error = %e,
                "Failed to publish response, answer is lost"
            );
            return Err(e);
        }
        Ok(true)
    }

    /// Run the backend call for one item and wrap the result
    pub async fn handle(&self, item: &QueueItem) -> ResponseEnvelope {
        if let Some(target) = &item.target_worker_id {
            if target != &self.id {
                tracing::warn!(
                    worker_id = %self.id,
                    target = %target,
                    "Handling item addressed to another worker id"
                );
            }
        }

        let request = AskRequest::new(item.question.prompt.clone()).following(
            item.question.conversation_id.clone(),
            item.question.parent_message_id.clone(),
        );
        tracing::info!(
            worker_id = %self.id,
            conversation_id = ?request.conversation_id,
            parent_message_id = ?request.parent_message_id,
            prompt_len = request.prompt.len(),
            "Backend request"
        );

        match self.config.retry.ask(self.backend.as_ref(), &request).await {
            Ok(reply) => {
                tracing::info!(
                    worker_id = %self.id,
                    conversation_id = %reply.conversation_id,
                    message_id = %reply.message_id,
                    "Backend response"
                );
                metrics::record_processed("success");
                ResponseEnvelope::answered(item, reply.into(), &self.id)
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = %self.id,
                    classification = e.class().as_str(),
                    error = %e,
                    "Backend request failed"
                );
                metrics::record_processed(e.class().as_str());
                ResponseEnvelope::failed(item, ErrorInfo::from(&e), &self.id)
            }
        }
    }
}
