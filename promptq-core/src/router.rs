// ABOUTME: Dispatch router: turns a prompt plus optional affinity into a queued question.
// ABOUTME: Follow-ups go to the owning worker's private queue, everything else to the common queue.

use crate::affinity::AffinityMarker;
use crate::metrics;
use crate::protocol::{Question, QueueItem};
use crate::queue::{worker_queue, Queue, QueueError, COMMON_QUEUE};
use serde_json::Value;

/// What `submit` did with a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank prompt, nothing enqueued
    Dropped,
    /// Pushed to the named queue
    Enqueued { queue: String },
}

/// Queue name a question with this affinity must go to
pub fn route(affinity: Option<&AffinityMarker>) -> String {
    match affinity {
        Some(marker) => worker_queue(&marker.worker_id),
        None => COMMON_QUEUE.to_string(),
    }
}

/// Submits questions on behalf of one consumer; answers come back on `response_queue`.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Queue,
    response_queue: String,
}

impl Dispatcher {
    pub fn new(queue: Queue, response_queue: impl Into<String>) -> Self {
        Self {
            queue,
            response_queue: response_queue.into(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn response_queue(&self) -> &str {
        &self.response_queue
    }

    /// Fire-and-forget submission. No confirmation that any worker will pick it up.
    pub async fn submit(
        &self,
        prompt: &str,
        affinity: Option<&AffinityMarker>,
        correlation_extra: Option<Value>,
    ) -> Result<SubmitOutcome, QueueError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            tracing::debug!("Dropping blank prompt");
            return Ok(SubmitOutcome::Dropped);
        }

        let item = QueueItem {
            question: Question {
                prompt: prompt.to_string(),
                conversation_id: affinity.map(|a| a.conversation_id.clone()),
                parent_message_id: affinity.map(|a| a.parent_message_id.clone()),
            },
            response_queue_name: self.response_queue.clone(),
            correlation_extra,
            target_worker_id: affinity.map(|a| a.worker_id.clone()),
        };

        let queue = route(affinity);
        self.queue.push(&queue, &item).await?;

        let route_label = if affinity.is_some() { "affinity" } else { "common" };
        metrics::record_submitted(route_label);
        tracing::info!(
            queue = %queue,
            route = route_label,
            conversation_id = ?item.question.conversation_id,
            "Question submitted"
        );
        Ok(SubmitOutcome::Enqueued { queue })
    }
}
