// ABOUTME: Conversational AI backend abstraction for promptq workers.
// ABOUTME: Provides the ChatBackend trait, its error taxonomy, and HTTP/mock backends.

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;

pub use error::{BackendError, ErrorClass};
pub use registry::{BackendFactory, BackendRegistry};
pub use traits::{AskRequest, ChatBackend, Reply, SharedBackend};
