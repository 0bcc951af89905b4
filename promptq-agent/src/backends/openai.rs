// ABOUTME: OpenAI-compatible chat completions backend.
// ABOUTME: Keeps conversation history in process memory, keyed by message id.

use crate::{AskRequest, BackendError, ChatBackend, Reply};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};

/// Connection and sampling settings for the HTTP backend
#[derive(Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    /// How many prior messages are replayed for a follow-up
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Messages kept for transcript lookup; least recently used ones are evicted
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

// Custom Debug impl to redact the key
impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("presence_penalty", &self.presence_penalty)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("max_history", &self.max_history)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

pub fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

pub fn default_max_history() -> usize {
    20
}

pub fn default_max_messages() -> usize {
    10_000
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredMessage {
    role: &'static str,
    content: String,
    parent_id: Option<String>,
    conversation_id: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: String,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat backend speaking the `/chat/completions` protocol.
///
/// The API itself is stateless; this backend keeps recent messages so a
/// `parent_message_id` can be expanded back into a transcript. That store lives only in
/// this process and holds at most `max_messages` entries.
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: RwLock<reqwest::Client>,
    messages: Mutex<LruCache<String, StoredMessage>>,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_messages).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            client: RwLock::new(reqwest::Client::new()),
            messages: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|config| {
            let config: OpenAiConfig = serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("Invalid openai backend config: {}", e))?;
            if config.api_key.trim().is_empty() {
                anyhow::bail!("openai backend requires an api_key");
            }
            Ok(std::sync::Arc::new(OpenAiBackend::new(config)))
        })
    }

    fn client(&self) -> reqwest::Client {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Walk parent links back from `parent_id`, oldest first, at most `max_history`
    fn transcript(&self, parent_id: Option<&str>) -> Vec<StoredMessage> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let mut chain = Vec::new();
        let mut cursor = parent_id.map(str::to_string);
        while let Some(id) = cursor {
            if chain.len() >= self.config.max_history {
                break;
            }
            let Some(message) = messages.get(&id) else {
                tracing::debug!(message_id = %id, "Parent message not found in local history");
                break;
            };
            cursor = message.parent_id.clone();
            chain.push(message.clone());
        }
        chain.reverse();
        chain
    }

    fn remember(&self, id: String, message: StoredMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(id, message);
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn start_session(&self) -> Result<(), BackendError> {
        tracing::info!(base_url = %self.config.base_url, model = %self.config.model, "Verifying backend credentials");
        let response = self
            .client()
            .get(self.url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| BackendError::other(format!("Failed to reach backend: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<(), BackendError> {
        // Drop pooled connections; the next request renegotiates from scratch
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = reqwest::Client::new();
        tracing::info!("Backend HTTP client recreated");
        self.start_session().await
    }

    async fn ask(&self, request: &AskRequest) -> Result<Reply, BackendError> {
        let history = self.transcript(request.parent_message_id.as_deref());
        let conversation_id = request
            .conversation_id
            .clone()
            .or_else(|| history.first().map(|m| m.conversation_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut messages: Vec<WireMessage<'_>> = history
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: &m.content,
            })
            .collect();
        messages.push(WireMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            presence_penalty: self.config.presence_penalty,
            frequency_penalty: self.config.frequency_penalty,
        };

        let response = self
            .client()
            .post(self.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::other(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::other(format!("Invalid completion response: {}", e)))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::other("Completion contained no message"))?;

        let user_id = uuid::Uuid::new_v4().to_string();
        let message_id = if completion.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            completion.id
        };

        self.remember(
            user_id.clone(),
            StoredMessage {
                role: "user",
                content: request.prompt.clone(),
                parent_id: request.parent_message_id.clone(),
                conversation_id: conversation_id.clone(),
            },
        );
        self.remember(
            message_id.clone(),
            StoredMessage {
                role: "assistant",
                content: text.clone(),
                parent_id: Some(user_id),
                conversation_id: conversation_id.clone(),
            },
        );

        Ok(Reply {
            text,
            conversation_id,
            message_id,
        })
    }
}
