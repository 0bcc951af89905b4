// ABOUTME: Bounded retry around one backend call, with forced reauthentication in between.
// ABOUTME: Only the session-expired signature is retried, and only once.

use crate::metrics;
use promptq_agent::{AskRequest, BackendError, ChatBackend, Reply};
use std::time::Duration;

/// First call plus one retry after a session refresh
pub const MAX_ATTEMPTS: u32 = 2;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REAUTH_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for each individual backend call
    pub request_timeout: Duration,
    /// Pause after a forced refresh before retrying
    pub reauth_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reauth_cooldown: DEFAULT_REAUTH_COOLDOWN,
        }
    }
}

impl RetryPolicy {
    /// Ask the backend, refreshing the session and retrying once on session expiry.
    ///
    /// Timeouts and other failures are returned immediately. A session that is still
    /// expired after the retry comes back as `BackendError::Other`.
    pub async fn ask(
        &self,
        backend: &dyn ChatBackend,
        request: &AskRequest,
    ) -> Result<Reply, BackendError> {
        let mut result = self.ask_once(backend, request).await;

        for attempt in 2..=MAX_ATTEMPTS {
            match &result {
                Err(err) if err.is_session_expired() => {
                    tracing::warn!(
                        backend = backend.name(),
                        error = %err,
                        attempt,
                        "Session expired, refreshing before retry"
                    );
                }
                _ => break,
            }

            metrics::record_reauth();
            if let Err(e) = backend.refresh_session().await {
                tracing::error!(backend = backend.name(), error = %e, "Session refresh failed");
                return Err(e);
            }
            tokio::time::sleep(self.reauth_cooldown).await;

            result = self.ask_once(backend, request).await;
        }

        // Still expired after a fresh session: no longer the recoverable kind
        match result {
            Err(err) if err.is_session_expired() => Err(BackendError::other(format!(
                "reauthentication did not help: {}",
                err
            ))),
            other => other,
        }
    }

    async fn ask_once(
        &self,
        backend: &dyn ChatBackend,
        request: &AskRequest,
    ) -> Result<Reply, BackendError> {
        match tokio::time::timeout(self.request_timeout, backend.ask(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.request_timeout)),
        }
    }
}
