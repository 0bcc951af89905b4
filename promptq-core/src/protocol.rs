// ABOUTME: Wire types exchanged over the queues: questions, queue items, answers, envelopes.
// ABOUTME: All serialize as camelCase JSON documents, one per list element.

use crate::identity::WorkerId;
use promptq_agent::{BackendError, ErrorClass, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A prompt and the conversation position it continues from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

impl Question {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            conversation_id: None,
            parent_message_id: None,
        }
    }
}

/// A request waiting in a question queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub question: Question,
    pub response_queue_name: String,
    /// Opaque caller data echoed back in the envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_extra: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_worker_id: Option<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub response_text: String,
    pub conversation_id: String,
    pub message_id: String,
}

impl From<Reply> for Answer {
    fn from(reply: Reply) -> Self {
        Self {
            response_text: reply.text,
            conversation_id: reply.conversation_id,
            message_id: reply.message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub classification: ErrorClass,
}

impl From<&BackendError> for ErrorInfo {
    fn from(err: &BackendError) -> Self {
        Self {
            message: err.to_string(),
            classification: err.class(),
        }
    }
}

/// The result of processing one queue item, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub question: Question,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_extra: Option<Value>,
    /// The worker that handled the item; follow-ups go back to it
    pub worker_id: WorkerId,
}

impl ResponseEnvelope {
    pub fn answered(item: &QueueItem, answer: Answer, worker_id: &WorkerId) -> Self {
        Self {
            success: true,
            answer: Some(answer),
            error: None,
            question: item.question.clone(),
            correlation_extra: item.correlation_extra.clone(),
            worker_id: worker_id.clone(),
        }
    }

    pub fn failed(item: &QueueItem, error: ErrorInfo, worker_id: &WorkerId) -> Self {
        Self {
            success: false,
            answer: None,
            error: Some(error),
            question: item.question.clone(),
            correlation_extra: item.correlation_extra.clone(),
            worker_id: worker_id.clone(),
        }
    }
}
