//! The shared internal event shape both transports produce
//!
//! The streaming HTTP client and the child-process pipe speak different
//! wire formats, but both are reduced to the same [`StreamEvent`] sequence
//! so the orchestrator is written once against a single consumer contract.

pub mod anthropic;
pub mod sse;

use futures::Stream;
use std::pin::Pin;

/// Kind of a content block announced by `BlockStart`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Streamed text
    Text,
    /// Streamed tool invocation input
    ToolUse,
    /// Anything this crate does not accumulate (e.g. thinking blocks)
    Other,
}

impl BlockKind {
    /// Map a wire `content_block.type` string
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "text" => BlockKind::Text,
            "tool_use" => BlockKind::ToolUse,
            _ => BlockKind::Other,
        }
    }
}

/// Token usage counters for one model turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnUsage {
    /// Tokens consumed by the request
    pub input_tokens: u32,
    /// Tokens produced by the response
    pub output_tokens: u32,
}

/// One protocol event of a streamed model turn
///
/// Produced transiently by a transport for the duration of one response;
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content block opened at `index`
    BlockStart {
        index: usize,
        kind: BlockKind,
        /// Tool invocation id, present when `kind` is `ToolUse`
        id: Option<String>,
        /// Tool name, present when `kind` is `ToolUse`
        name: Option<String>,
    },
    /// Incremental text for the block at `index`
    TextDelta { index: usize, text: String },
    /// Incremental raw JSON for the tool block at `index`
    InputJsonDelta { index: usize, partial_json: String },
    /// The block at `index` is complete
    BlockStop { index: usize },
    /// Turn-level metadata update
    TurnDelta {
        stop_reason: Option<String>,
        usage: Option<TurnUsage>,
    },
    /// The turn is complete
    TurnEnd,
    /// Terminal transport or provider fault; the sequence ends after this
    Error { message: String },
}

/// Stop-reason value signalling a tool-use round
pub const STOP_REASON_TOOL_USE: &str = "tool_use";

/// A finite, ordered sequence of stream events for one model turn
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
