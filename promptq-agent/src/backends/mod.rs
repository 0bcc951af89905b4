// ABOUTME: Backend implementations for the ChatBackend trait.
// ABOUTME: OpenAI-compatible HTTP backend for production, mock backend for tests.

pub mod mock;
pub mod openai;
