// ABOUTME: Mock backend for testing - returns pre-configured replies and failures.
// ABOUTME: Allows deterministic worker tests without talking to a real AI service.
//!
//! # Example
//!
//! ```no_run
//! use promptq_agent::backends::mock::MockBackend;
//! use promptq_agent::{AskRequest, BackendError, ChatBackend};
//!
//! # async fn example() {
//! let mock = MockBackend::new()
//!     .on_prompt("2+2").respond_text("4")
//!     .on_prompt("flaky").fail_with(BackendError::SessionExpired("403".into()));
//!
//! let reply = mock.ask(&AskRequest::new("2+2?")).await.unwrap();
//! assert_eq!(reply.text, "4");
//! # }
//! ```

use crate::{AskRequest, BackendError, ChatBackend, Reply};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock backend for testing. Clones share expectations and recorded calls.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    calls: Vec<AskRequest>,
    refreshes: usize,
    starts: usize,
    start_error: Option<BackendError>,
    counter: u64,
}

struct Expectation {
    pattern: String,
    outcome: Outcome,
    delay: Option<Duration>,
}

enum Outcome {
    Text(String),
    Reply(Reply),
    Fail(BackendError),
}

impl MockBackend {
    /// Create a new mock backend with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up an expectation for a prompt containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
            delay: None,
        }
    }

    /// Make `start_session` fail with the given error
    pub fn failing_start(self, err: BackendError) -> Self {
        self.lock().start_error = Some(err);
        self
    }

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<AskRequest> {
        self.lock().calls.clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.lock().refreshes
    }

    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    /// Expectations that were never consumed
    pub fn pending_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, expectation: Expectation) {
        self.lock().expectations.push_back(expectation);
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start_session(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.starts += 1;
        match state.start_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn refresh_session(&self) -> Result<(), BackendError> {
        self.lock().refreshes += 1;
        Ok(())
    }

    async fn ask(&self, request: &AskRequest) -> Result<Reply, BackendError> {
        // Match with FIFO preference: front first, then the first matching one
        let (expectation, conversation_id, message_id) = {
            let mut state = self.lock();
            state.calls.push(request.clone());
            state.counter += 1;
            let n = state.counter;

            let position = match state.expectations.front() {
                Some(front) if request.prompt.contains(&front.pattern) => Some(0),
                _ => state
                    .expectations
                    .iter()
                    .position(|e| request.prompt.contains(&e.pattern)),
            };
            let expectation = position.and_then(|i| state.expectations.remove(i));
            let conversation_id = request
                .conversation_id
                .clone()
                .unwrap_or_else(|| format!("mock-conv-{}", n));
            (expectation, conversation_id, format!("mock-msg-{}", n))
        };

        let Some(expectation) = expectation else {
            return Ok(Reply {
                text: format!("Mock: no expectation for '{}'", request.prompt),
                conversation_id,
                message_id,
            });
        };

        if let Some(delay) = expectation.delay {
            tokio::time::sleep(delay).await;
        }

        match expectation.outcome {
            Outcome::Text(text) => Ok(Reply {
                text,
                conversation_id,
                message_id,
            }),
            Outcome::Reply(reply) => Ok(reply),
            Outcome::Fail(err) => Err(err),
        }
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockBackend,
    pattern: String,
    delay: Option<Duration>,
}

impl ExpectationBuilder {
    /// Wait before answering (useful for timeout tests)
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Respond with text; conversation and message ids are generated
    pub fn respond_text(self, text: &str) -> MockBackend {
        self.finish(Outcome::Text(text.to_string()))
    }

    /// Respond with a fully specified reply
    pub fn respond_reply(self, text: &str, conversation_id: &str, message_id: &str) -> MockBackend {
        self.finish(Outcome::Reply(Reply {
            text: text.to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        }))
    }

    /// Fail with the given error
    pub fn fail_with(self, err: BackendError) -> MockBackend {
        self.finish(Outcome::Fail(err))
    }

    fn finish(self, outcome: Outcome) -> MockBackend {
        self.backend.push(Expectation {
            pattern: self.pattern,
            outcome,
            delay: self.delay,
        });
        self.backend
    }
}
