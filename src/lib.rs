// ABOUTME: Root library module for the promptq binary
// ABOUTME: Terminal front end, logging setup, and worker/chat bootstrap

pub mod app;
pub mod console;
pub mod logging;

// Re-export platform-agnostic modules from promptq-core
pub use promptq_core::config;
pub use promptq_core::metrics;

// Re-export backend types for convenience
pub use promptq_agent::{BackendRegistry, ChatBackend};
