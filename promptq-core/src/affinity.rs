// ABOUTME: Affinity markers embedded in rendered answers: `_ref:<conv>:<parent>:<worker>_`.
// ABOUTME: Encodes, decodes, and recovers the conversation-to-worker binding from thread text.

use crate::frontend::ThreadMessage;
use crate::identity::WorkerId;
use crate::protocol::Answer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tail-anchored: the marker must be the last thing in the message
static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"_ref:([^\s:]+):([^\s:]+):([^\s:]+)_\s*$").expect("marker regex is valid")
});

/// Which conversation a thread is in, and which worker holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinityMarker {
    pub conversation_id: String,
    pub parent_message_id: String,
    pub worker_id: WorkerId,
}

impl AffinityMarker {
    pub fn new(
        conversation_id: impl Into<String>,
        parent_message_id: impl Into<String>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            parent_message_id: parent_message_id.into(),
            worker_id,
        }
    }

    /// Marker pointing at `answer` as the parent of the next question
    pub fn for_answer(answer: &Answer, worker_id: &WorkerId) -> Self {
        Self::new(
            answer.conversation_id.clone(),
            answer.message_id.clone(),
            worker_id.clone(),
        )
    }

    pub fn encode(&self) -> String {
        encode_marker(
            &self.conversation_id,
            &self.parent_message_id,
            self.worker_id.as_str(),
        )
    }
}

/// Produce the marker token for the triple
pub fn encode_marker(conversation_id: &str, parent_message_id: &str, worker_id: &str) -> String {
    format!(
        "_ref:{}:{}:{}_",
        escape(conversation_id),
        escape(parent_message_id),
        escape(worker_id)
    )
}

/// Extract the marker at the end of `text`; `None` when absent or malformed
pub fn decode_marker(text: &str) -> Option<AffinityMarker> {
    let caps = MARKER_RE.captures(text.trim())?;
    Some(AffinityMarker {
        conversation_id: unescape(&caps[1])?,
        parent_message_id: unescape(&caps[2])?,
        worker_id: WorkerId::from_raw(unescape(&caps[3])?),
    })
}

/// Answer text as posted to the chat, marker appended
pub fn render_answer(answer: &Answer, worker_id: &WorkerId) -> String {
    format!(
        "{}\n\n{}",
        answer.response_text,
        AffinityMarker::for_answer(answer, worker_id).encode()
    )
}

/// Newest marker found in messages written by `bot_user_id`.
///
/// `history` is oldest first. Messages that fail to parse, or whose worker id does not
/// name a worker queue, are skipped.
pub fn recover_affinity(history: &[ThreadMessage], bot_user_id: &str) -> Option<AffinityMarker> {
    history
        .iter()
        .rev()
        .filter(|m| m.author == bot_user_id)
        .filter_map(|m| decode_marker(&m.text))
        .find(|marker| marker.worker_id.is_routable())
}

// A lone `%` stands for the empty string; real percent signs are always `%25`.
const EMPTY_TOKEN: &str = "%";

fn escape(token: &str) -> String {
    if token.is_empty() {
        return EMPTY_TOKEN.to_string();
    }
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if c == '%' || c == ':' || c == '_' || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(token: &str) -> Option<String> {
    if token == EMPTY_TOKEN {
        return Some(String::new());
    }
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = token.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
