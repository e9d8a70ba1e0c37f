//! Transport seam between the orchestrator and a model backend
//!
//! Two implementations exist: [`http::HttpTransport`] streams directly
//! from the model API, and [`ipc::ChildTransport`] drives an agent child
//! process over a line-JSON pipe. Both reduce their wire traffic to the
//! same [`crate::protocol::StreamEvent`] sequence, so the orchestrator is
//! written once against this trait.

pub mod http;
pub mod ipc;

use crate::conversation::{ContentFragment, Turn};
use crate::error::BobbinResult;
use crate::protocol::EventStream;
use crate::tools::ToolSpec;
use async_trait::async_trait;

/// Everything a transport needs to start the next model turn
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// System instructions
    pub system: &'a str,
    /// The conversation so far, oldest first
    pub turns: &'a [Turn],
    /// Tool definitions for this request
    pub tools: &'a [ToolSpec],
}

/// A backend capable of running model turns
#[async_trait]
pub trait Transport: Send {
    /// Start the next model turn and return its event sequence
    ///
    /// The returned stream is finite: it ends after `TurnEnd`, after a
    /// terminal `Error` event, or when the backend closes (which the
    /// consumer must treat as an implicit turn end).
    async fn open_turn(&mut self, request: TurnRequest<'_>) -> BobbinResult<EventStream>;

    /// Deliver one tool result back to the model side
    ///
    /// The HTTP backend carries results inside the next `open_turn`
    /// request, so this defaults to a no-op; the pipe backend must reply
    /// on the wire before the child continues.
    async fn send_tool_result(&mut self, _fragment: &ContentFragment) -> BobbinResult<()> {
        Ok(())
    }

    /// Release backend resources; must be idempotent
    async fn shutdown(&mut self) -> BobbinResult<()> {
        Ok(())
    }
}
