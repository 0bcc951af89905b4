// ABOUTME: Chat front end abstraction consumed by the relay.
// ABOUTME: Posting replies, toggling status reactions, and reading thread history.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message previously posted in a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    /// User id of the author
    pub author: String,
    pub text: String,
}

impl ThreadMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

/// Where a prompt came from. Round-trips through the queues as correlation extra.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOrigin {
    pub channel: String,
    /// Id/timestamp of the message carrying the prompt
    pub ts: String,
    /// Thread root, when the prompt was posted inside a thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

/// A prompt delivered by the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPrompt {
    pub origin: ChatOrigin,
    pub text: String,
}

/// The chat platform side of the relay.
///
/// Implementations wrap a concrete platform (Slack, a terminal, a test double).
#[async_trait]
pub trait ChatFrontend: Send + Sync {
    /// Our own user id; only messages by this author can carry affinity markers
    fn bot_user_id(&self) -> &str;

    /// Messages of a thread, oldest first
    async fn thread_history(&self, channel: &str, thread_ts: &str) -> Result<Vec<ThreadMessage>>;

    /// Post `text` as a reply in the thread rooted at `thread_ts`
    async fn post_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;
}
