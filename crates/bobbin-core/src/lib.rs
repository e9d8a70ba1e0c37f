//! Bobbin core library
//!
//! Bobbin lets a host application hold a multi-turn conversation with a
//! tool-using language model: the model streams text and tool requests,
//! the host executes the tools, and the results feed back into the next
//! model round. This crate provides the conversation data model, the
//! stream protocol parsing, the tool registry, the two transports
//! (streaming HTTP and a line-JSON child-process pipe), and the
//! orchestrator that ties them together.

pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod tools;
pub mod transport;

// Re-export commonly used types
pub use config::{ApiConfig, OrchestratorConfig};
pub use conversation::{ContentFragment, ElementCode, Role, SessionBootstrap, Turn};
pub use error::{BobbinError, BobbinResult};
pub use orchestrator::events::{
    ChannelObserver, ConversationEvent, ConversationObserver, NullObserver,
};
pub use orchestrator::state::OrchestratorState;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use protocol::{BlockKind, EventStream, StreamEvent, TurnUsage};
pub use tools::{ExecutionContext, Tool, ToolError, ToolOutput, ToolParameter, ToolRegistry, ToolSpec};
pub use transport::http::HttpTransport;
pub use transport::ipc::{ChildTransport, IpcSessionOptions};
pub use transport::{Transport, TurnRequest};
