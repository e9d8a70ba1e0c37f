//! Orchestrator lifecycle states

/// Lifecycle state of the conversation orchestrator
///
/// `Idle → Streaming → (ToolDispatch → Streaming)* → Done`, with
/// `Cancelled` reachable from any suspension point and `Failed` reachable
/// from `Streaming` on a transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No turn in flight
    Idle,
    /// Reading a model response stream
    Streaming,
    /// Executing requested tools
    ToolDispatch,
    /// The last run completed normally (or hit the loop bound)
    Done,
    /// The last run was cancelled
    Cancelled,
    /// The last run hit a transport fault
    Failed,
}

impl OrchestratorState {
    /// Whether this state ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Done | OrchestratorState::Cancelled | OrchestratorState::Failed
        )
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Streaming => "streaming",
            OrchestratorState::ToolDispatch => "tool_dispatch",
            OrchestratorState::Done => "done",
            OrchestratorState::Cancelled => "cancelled",
            OrchestratorState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
