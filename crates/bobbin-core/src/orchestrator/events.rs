//! Events emitted by the orchestrator for UI consumption
//!
//! The orchestrator never calls into presentation code; hosts implement
//! [`ConversationObserver`] (or take a channel via [`ChannelObserver`])
//! and render these however they like.

use crate::conversation::Turn;
use crate::protocol::TurnUsage;
use tokio::sync::mpsc;

/// UI-facing state changes of one conversation
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// The orchestrator started its first run
    SessionStarted { session_id: String },
    /// A model response stream opened
    StreamingStarted,
    /// Incremental response text, surfaced as it arrives
    TextDelta { text: String },
    /// The response stream closed
    StreamingEnded { usage: TurnUsage },
    /// A tool execution began
    ToolStarted { id: String, name: String },
    /// A tool execution finished
    ToolCompleted {
        id: String,
        name: String,
        is_error: bool,
    },
    /// A turn was appended to the conversation
    TurnCompleted { turn: Turn },
    /// A terminal condition appended a status note
    StatusNote { text: String },
    /// The run hit a transport fault
    Failed { message: String },
}

/// Observer interface for conversation events
pub trait ConversationObserver: Send + Sync {
    /// Handle one event; called from the orchestrator's task
    fn on_event(&self, event: ConversationEvent);
}

/// Observer that discards every event
pub struct NullObserver;

impl ConversationObserver for NullObserver {
    fn on_event(&self, _event: ConversationEvent) {}
}

/// Observer that forwards events onto an unbounded channel
///
/// Useful when the UI runs on its own task and wants to poll events
/// without blocking the orchestrator.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ConversationEvent>,
}

impl ChannelObserver {
    /// Create an observer plus the receiving end for the UI task
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ConversationObserver for ChannelObserver {
    fn on_event(&self, event: ConversationEvent) {
        // A gone receiver just means the UI stopped listening.
        let _ = self.sender.send(event);
    }
}
