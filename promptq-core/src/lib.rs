// ABOUTME: Queue-based dispatch protocol between chat front ends and AI workers
// ABOUTME: Routing with worker affinity, worker polling loop, reauth retry, and answer relay

pub mod affinity;
pub mod bindings;
pub mod config;
pub mod frontend;
pub mod identity;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod retry;
pub mod router;
pub mod store;
pub mod worker;

pub use affinity::{decode_marker, encode_marker, recover_affinity, render_answer, AffinityMarker};
pub use frontend::{ChatFrontend, ChatOrigin, IncomingPrompt, ThreadMessage};
pub use identity::WorkerId;
pub use protocol::{Answer, ErrorInfo, Question, QueueItem, ResponseEnvelope};
pub use queue::{Queue, QueueError};
pub use relay::{Reactions, Relay};
pub use router::{Dispatcher, SubmitOutcome};
pub use store::{QueueStore, SharedStore, StoreError};
pub use worker::{Worker, WorkerConfig};

// Re-export backend types for convenience
pub use promptq_agent::{AskRequest, BackendError, ChatBackend, ErrorClass, Reply, SharedBackend};
