pub mod adapters;
pub mod context;
pub mod debug;
pub mod error;
pub mod orchestrator;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use adapters::{select_adapter, supports_summarization, Adapter, HttpMethod, RequestPayload};
pub use context::{build_context, WireMessage};
pub use debug::DebugStore;
pub use error::{classify, is_reportable, redact_secrets, user_message, ErrorKind, ErrorReport};
pub use orchestrator::{ChatClient, CONTINUE_PROMPT};
pub use transport::{DirectTransport, RelayTransport, Transport, TransportError};
pub use types::*;
