// ABOUTME: Front-end side of the protocol: submits chat prompts and renders queued answers.
// ABOUTME: Recovers thread affinity, manages status reactions, and drains the response queue.

use crate::affinity::{recover_affinity, render_answer, AffinityMarker};
use crate::bindings::ThreadBindings;
use crate::frontend::{ChatFrontend, ChatOrigin, IncomingPrompt};
use crate::metrics;
use crate::protocol::ResponseEnvelope;
use crate::queue::QueueError;
use crate::router::{Dispatcher, SubmitOutcome};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reaction names used as status markers. An empty name disables that marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reactions {
    pub loading: String,
    pub success: String,
    pub failed: String,
}

impl Default for Reactions {
    fn default() -> Self {
        Self {
            loading: "thinking_face".to_string(),
            success: "white_check_mark".to_string(),
            failed: "x".to_string(),
        }
    }
}

/// Remove `<@BOTID>` mentions of ourselves and trim
pub fn strip_mention(text: &str, bot_user_id: &str) -> String {
    text.replace(&format!("<@{}>", bot_user_id), "")
        .trim()
        .to_string()
}

/// Text posted when a question could not be answered
pub fn render_error(message: &str) -> String {
    format!("Error: {} \nPlease ask again...", message)
}

pub struct Relay<F: ChatFrontend> {
    frontend: Arc<F>,
    dispatcher: Dispatcher,
    bindings: ThreadBindings,
    reactions: Reactions,
    poll_interval: Duration,
}

impl<F: ChatFrontend> Relay<F> {
    pub fn new(
        frontend: Arc<F>,
        dispatcher: Dispatcher,
        bindings: ThreadBindings,
        reactions: Reactions,
        poll_interval: Duration,
    ) -> Self {
        Self {
            frontend,
            dispatcher,
            bindings,
            reactions,
            poll_interval,
        }
    }

    pub fn frontend(&self) -> &Arc<F> {
        &self.frontend
    }

    /// Accept a prompt from the chat platform and queue it
    pub async fn on_message(&self, incoming: IncomingPrompt) -> Result<SubmitOutcome> {
        let prompt = strip_mention(&incoming.text, self.frontend.bot_user_id());
        if prompt.is_empty() {
            return Ok(SubmitOutcome::Dropped);
        }
        let origin = incoming.origin;

        let affinity = match &origin.thread_ts {
            Some(thread_ts) => self.recover(&origin.channel, thread_ts).await,
            None => None,
        };

        self.react(&origin, &self.reactions.loading, true).await;

        let extra = serde_json::to_value(&origin).context("Failed to encode chat origin")?;
        let outcome = self
            .dispatcher
            .submit(&prompt, affinity.as_ref(), Some(extra))
            .await
            .context("Failed to submit question")?;
        Ok(outcome)
    }

    /// Affinity for a thread: stored binding first, then markers in the thread history
    pub async fn recover(&self, channel: &str, thread_ts: &str) -> Option<AffinityMarker> {
        if let Some(marker) = self.bindings.lookup(channel, thread_ts).await {
            tracing::debug!(channel = %channel, thread_ts = %thread_ts, "Affinity from thread binding");
            return Some(marker);
        }
        let history = match self.frontend.thread_history(channel, thread_ts).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Failed to read thread history");
                return None;
            }
        };
        recover_affinity(&history, self.frontend.bot_user_id())
    }

    /// Render one envelope back into the chat
    pub async fn deliver(&self, envelope: ResponseEnvelope) -> Result<()> {
        let origin: ChatOrigin = match envelope
            .correlation_extra
            .clone()
            .map(serde_json::from_value::<ChatOrigin>)
        {
            Some(Ok(origin)) => origin,
            Some(Err(e)) => {
                metrics::record_delivered("unroutable");
                tracing::warn!(error = %e, worker_id = %envelope.worker_id, "Envelope has unreadable origin, dropping");
                return Ok(());
            }
            None => {
                metrics::record_delivered("unroutable");
                tracing::warn!(worker_id = %envelope.worker_id, "Envelope has no origin, dropping");
                return Ok(());
            }
        };
        let thread_ts = origin.thread_ts.as_deref().unwrap_or(&origin.ts);

        let posted = match (envelope.success, &envelope.answer) {
            (true, Some(answer)) => {
                let text = render_answer(answer, &envelope.worker_id);
                let posted = self
                    .frontend
                    .post_reply(&origin.channel, thread_ts, &text)
                    .await
                    .context("Failed to post answer");
                if posted.is_ok() {
                    self.react(&origin, &self.reactions.success, true).await;
                    let marker = AffinityMarker::for_answer(answer, &envelope.worker_id);
                    if let Err(e) = self.bindings.record(&origin.channel, thread_ts, &marker).await {
                        tracing::warn!(error = %e, "Failed to record thread binding");
                    }
                    metrics::record_delivered("answer");
                } else {
                    self.react(&origin, &self.reactions.failed, true).await;
                }
                posted
            }
            _ => {
                let message = envelope
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("no answer was produced");
                let posted = self
                    .frontend
                    .post_reply(&origin.channel, thread_ts, &render_error(message))
                    .await
                    .context("Failed to post error");
                if posted.is_ok() {
                    metrics::record_delivered("error");
                }
                self.react(&origin, &self.reactions.failed, true).await;
                posted
            }
        };

        if posted.is_err() {
            metrics::record_delivered("post_failed");
        }
        // Cleared whether or not the reply made it out
        self.react(&origin, &self.reactions.loading, false).await;
        posted
    }

    /// Pop and deliver at most one envelope. Returns whether one was found.
    pub async fn poll_answers(&self) -> Result<bool> {
        let queue_name = self.dispatcher.response_queue().to_string();
        let popped = self
            .dispatcher
            .queue()
            .pop::<ResponseEnvelope>(&queue_name)
            .await;
        let envelope = match popped {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(false),
            Err(QueueError::Malformed { queue, source }) => {
                metrics::record_malformed_item();
                tracing::error!(queue = %queue, error = %source, "Dropping malformed envelope");
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };
        self.deliver(envelope).await?;
        Ok(true)
    }

    /// Drain the response queue until `shutdown` is cancelled
    pub async fn listen_answers(&self, shutdown: CancellationToken) {
        tracing::info!(queue = %self.dispatcher.response_queue(), "Listening for answers");
        loop {
            if let Err(e) = self.poll_answers().await {
                tracing::warn!(error = %e, "Answer delivery failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn react(&self, origin: &ChatOrigin, name: &str, add: bool) {
        if name.is_empty() {
            return;
        }
        let result = if add {
            self.frontend.add_reaction(&origin.channel, &origin.ts, name).await
        } else {
            self.frontend
                .remove_reaction(&origin.channel, &origin.ts, name)
                .await
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, reaction = %name, add, "Reaction update failed");
        }
    }
}
