// ABOUTME: Core ChatBackend trait that all conversational backends implement.
// ABOUTME: Defines session lifecycle and the single ask operation used by workers.

use crate::BackendError;
use async_trait::async_trait;
use std::sync::Arc;

/// A prompt plus the conversation position it continues from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AskRequest {
    pub prompt: String,
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
}

impl AskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Continue an existing conversation after `parent_message_id`
    pub fn following(
        mut self,
        conversation_id: Option<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        self.conversation_id = conversation_id;
        self.parent_message_id = parent_message_id;
        self
    }
}

/// A successful backend answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub conversation_id: String,
    pub message_id: String,
}

/// Core trait that all backends implement.
///
/// A backend owns its authentication and any conversation state. State is local to
/// the process, which is why follow-ups must be routed back to the same worker.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Establish the initial session. Failure here is fatal for a worker.
    async fn start_session(&self) -> Result<(), BackendError>;

    /// Force a fresh session after an authorization failure
    async fn refresh_session(&self) -> Result<(), BackendError>;

    /// Send one prompt and wait for the complete answer
    async fn ask(&self, request: &AskRequest) -> Result<Reply, BackendError>;
}

pub type SharedBackend = Arc<dyn ChatBackend>;
