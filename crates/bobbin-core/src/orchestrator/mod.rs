//! The conversation orchestrator: accumulation, tool dispatch, loop control
//!
//! One orchestrator serves one conversation. All state mutation happens on
//! the task driving [`Orchestrator::run`]; background transport readers
//! only hand events over through the event stream, so no two turns can
//! ever interleave their accumulation.

pub mod accum;
pub mod events;
pub mod state;

use crate::config::OrchestratorConfig;
use crate::conversation::{ContentFragment, Role, SessionBootstrap, Turn};
use crate::error::BobbinResult;
use crate::orchestrator::accum::{PreparedCall, TurnAccumulator};
use crate::orchestrator::events::{ConversationEvent, ConversationObserver, NullObserver};
use crate::orchestrator::state::OrchestratorState;
use crate::protocol::{StreamEvent, STOP_REASON_TOOL_USE};
use crate::tools::{ExecutionContext, ToolRegistry};
use crate::transport::{Transport, TurnRequest};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a single run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model finished without requesting further tools
    Completed,
    /// The run was cancelled
    Cancelled,
    /// A transport fault ended the run
    Failed { message: String },
    /// The tool-use loop hit its configured bound
    LoopLimitReached,
}

/// How the event stream of one turn ended
enum StreamEnding {
    Ended,
    Cancelled,
    Errored(String),
}

/// Why a dispatch round stopped early
enum DispatchAbort {
    Cancelled,
    ConnectionLost(String),
}

/// Drives one tool-using conversation against a transport
pub struct Orchestrator {
    transport: Box<dyn Transport>,
    registry: Arc<ToolRegistry>,
    observer: Arc<dyn ConversationObserver>,
    config: OrchestratorConfig,
    context: ExecutionContext,
    conversation: Vec<Turn>,
    state: OrchestratorState,
    cancel: CancellationToken,
    session_id: String,
    session_announced: bool,
}

impl Orchestrator {
    /// Create an orchestrator over the given transport and tool registry
    pub fn new(
        transport: Box<dyn Transport>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            observer: Arc::new(NullObserver),
            config,
            context: ExecutionContext::empty(),
            conversation: Vec::new(),
            state: OrchestratorState::Idle,
            cancel: CancellationToken::new(),
            session_id: uuid::Uuid::new_v4().to_string(),
            session_announced: false,
        }
    }

    /// Set the observer receiving UI-facing events
    pub fn with_observer(mut self, observer: Arc<dyn ConversationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Set the opaque host context threaded through to tool executors
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Session identifier surfaced in observer events
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// The conversation history so far, oldest turn first
    pub fn conversation(&self) -> &[Turn] {
        &self.conversation
    }

    /// Token that cancels the run currently in flight
    ///
    /// Cancelling while idle is a no-op: the next `run` starts with a
    /// fresh token, so grab the token again after each run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Append a user turn without running the loop
    pub fn push_user_turn(&mut self, turn: Turn) {
        if turn.role != Role::User {
            tracing::warn!("pushed turn does not have the user role");
        }
        self.conversation.push(turn);
    }

    /// Append a plain text user message and run the loop
    pub async fn send_user_message(&mut self, text: impl Into<String>) -> BobbinResult<RunOutcome> {
        self.push_user_turn(Turn::user_text(text.into()));
        self.run().await
    }

    /// Open the session with bootstrap content and run the loop
    ///
    /// Only for the HTTP transport; the pipe transport carries bootstrap
    /// data inside its `init` message instead.
    pub async fn run_bootstrap(
        &mut self,
        bootstrap: SessionBootstrap,
    ) -> BobbinResult<RunOutcome> {
        self.push_user_turn(bootstrap.into_turn());
        self.run().await
    }

    /// Release the transport's resources; idempotent
    pub async fn shutdown(&mut self) -> BobbinResult<()> {
        self.transport.shutdown().await
    }

    /// Run the tool-use loop until the model stops asking for tools
    ///
    /// Every terminal condition appends exactly one status turn, so the
    /// UI always has something to render.
    pub async fn run(&mut self) -> BobbinResult<RunOutcome> {
        // A cancellation left over from a previous run must not kill this
        // one; cancel only affects the run in flight.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        if !self.session_announced {
            self.session_announced = true;
            self.observer.on_event(ConversationEvent::SessionStarted {
                session_id: self.session_id.clone(),
            });
        }

        for round in 0..self.config.max_tool_loops {
            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled(None));
            }

            self.repair_conversation();

            let definitions = self.registry.definitions();
            self.state = OrchestratorState::Streaming;
            self.observer.on_event(ConversationEvent::StreamingStarted);
            tracing::debug!(round, turns = self.conversation.len(), "opening model turn");

            let request = TurnRequest {
                system: &self.config.system_prompt,
                turns: &self.conversation,
                tools: &definitions,
            };
            let opened = tokio::select! {
                opened = self.transport.open_turn(request) => opened,
                _ = self.cancel.cancelled() => return Ok(self.finish_cancelled(None)),
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(error) => return Ok(self.finish_failed(error.to_string(), None)),
            };

            let mut accum = TurnAccumulator::new();
            let ending = loop {
                let event = tokio::select! {
                    event = stream.next() => event,
                    _ = self.cancel.cancelled() => break StreamEnding::Cancelled,
                };
                match event {
                    // Transport closed without a turn end; treat the turn
                    // as ended anyway.
                    None => break StreamEnding::Ended,
                    Some(StreamEvent::TurnEnd) => break StreamEnding::Ended,
                    Some(StreamEvent::Error { message }) => break StreamEnding::Errored(message),
                    Some(StreamEvent::TextDelta { index, text }) => {
                        self.observer.on_event(ConversationEvent::TextDelta {
                            text: text.clone(),
                        });
                        accum.apply(&StreamEvent::TextDelta { index, text });
                    }
                    Some(event) => accum.apply(&event),
                }
            };
            // Dropping the stream closes the underlying read source.
            drop(stream);

            self.observer.on_event(ConversationEvent::StreamingEnded {
                usage: accum.usage(),
            });

            let requested_tools = accum.stop_reason() == Some(STOP_REASON_TOOL_USE);
            let (turn, calls) = accum.finish();

            match ending {
                StreamEnding::Cancelled => return Ok(self.finish_cancelled(turn)),
                StreamEnding::Errored(message) => {
                    return Ok(self.finish_failed(message, turn))
                }
                StreamEnding::Ended => {}
            }

            if let Some(turn) = turn {
                self.observer.on_event(ConversationEvent::TurnCompleted {
                    turn: turn.clone(),
                });
                self.conversation.push(turn);
            }

            if !requested_tools || calls.is_empty() {
                self.state = OrchestratorState::Done;
                tracing::info!(rounds = round + 1, "conversation turn completed");
                return Ok(RunOutcome::Completed);
            }

            if let Some(abort) = self.dispatch_tools(&calls).await {
                return Ok(match abort {
                    DispatchAbort::Cancelled => self.finish_cancelled(None),
                    DispatchAbort::ConnectionLost(message) => self.finish_failed(message, None),
                });
            }
        }

        let note = "[Tool-use loop limit reached]";
        self.conversation.push(Turn::assistant_text(note));
        self.observer.on_event(ConversationEvent::StatusNote {
            text: note.to_string(),
        });
        self.state = OrchestratorState::Done;
        tracing::warn!(
            max_tool_loops = self.config.max_tool_loops,
            "tool-use loop limit reached"
        );
        Ok(RunOutcome::LoopLimitReached)
    }

    /// Execute one round of tool requests, in request order
    ///
    /// Always appends a user turn answering every request, even when
    /// cancellation or a lost connection cuts the round short.
    async fn dispatch_tools(&mut self, calls: &[PreparedCall]) -> Option<DispatchAbort> {
        self.state = OrchestratorState::ToolDispatch;
        let mut results: Vec<ContentFragment> = Vec::with_capacity(calls.len());
        let mut abort: Option<DispatchAbort> = None;

        for call in calls {
            if abort.is_none() && self.cancel.is_cancelled() {
                abort = Some(DispatchAbort::Cancelled);
            }
            if let Some(current) = &abort {
                let note = match current {
                    DispatchAbort::Cancelled => "[Cancelled]",
                    DispatchAbort::ConnectionLost(_) => "[Connection lost]",
                };
                results.push(placeholder_result(&call.id, note));
                continue;
            }

            self.observer.on_event(ConversationEvent::ToolStarted {
                id: call.id.clone(),
                name: call.name.clone(),
            });

            let mut cancelled_here = false;
            let fragment = tokio::select! {
                fragment = self
                    .registry
                    .execute(&call.name, &call.input, &call.id, &self.context) => fragment,
                _ = self.cancel.cancelled() => {
                    cancelled_here = true;
                    placeholder_result(&call.id, "[Cancelled]")
                }
            };

            if cancelled_here {
                abort = Some(DispatchAbort::Cancelled);
                results.push(fragment);
                continue;
            }

            let is_error = matches!(
                &fragment,
                ContentFragment::ToolResult { is_error: true, .. }
            );
            self.observer.on_event(ConversationEvent::ToolCompleted {
                id: call.id.clone(),
                name: call.name.clone(),
                is_error,
            });

            if let Err(error) = self.transport.send_tool_result(&fragment).await {
                tracing::warn!(%error, tool = %call.name, "failed to deliver tool result");
                abort = Some(DispatchAbort::ConnectionLost(error.to_string()));
            }
            results.push(fragment);
        }

        self.conversation.push(Turn::user(results));
        abort
    }

    /// Ensure every assistant tool request has a matching result
    ///
    /// A crashed or cancelled earlier round must not poison the next
    /// request, so unanswered requests gain placeholder error results.
    fn repair_conversation(&mut self) {
        let mut index = 0;
        while index < self.conversation.len() {
            if self.conversation[index].role != Role::Assistant {
                index += 1;
                continue;
            }
            let request_ids: Vec<String> = self.conversation[index]
                .tool_use_ids()
                .iter()
                .map(|id| id.to_string())
                .collect();
            if request_ids.is_empty() {
                index += 1;
                continue;
            }

            let next_is_user = self
                .conversation
                .get(index + 1)
                .map(|turn| turn.role == Role::User)
                .unwrap_or(false);
            let answered: HashSet<String> = if next_is_user {
                self.conversation[index + 1]
                    .content
                    .iter()
                    .filter_map(|fragment| match fragment {
                        ContentFragment::ToolResult { tool_use_id, .. } => {
                            Some(tool_use_id.clone())
                        }
                        _ => None,
                    })
                    .collect()
            } else {
                HashSet::new()
            };

            let placeholders: Vec<ContentFragment> = request_ids
                .iter()
                .filter(|id| !answered.contains(*id))
                .map(|id| placeholder_result(id, "[No result - interrupted]"))
                .collect();

            if !placeholders.is_empty() {
                tracing::warn!(count = placeholders.len(), "repairing unanswered tool requests");
                if next_is_user {
                    let existing = std::mem::take(&mut self.conversation[index + 1].content);
                    let mut content = placeholders;
                    content.extend(existing);
                    self.conversation[index + 1].content = content;
                } else {
                    self.conversation.insert(index + 1, Turn::user(placeholders));
                }
            }
            index += 1;
        }
    }

    fn finish_cancelled(&mut self, partial: Option<Turn>) -> RunOutcome {
        if let Some(turn) = partial {
            self.observer.on_event(ConversationEvent::TurnCompleted {
                turn: turn.clone(),
            });
            self.conversation.push(turn);
        }
        let note = "[Stopped]";
        self.conversation.push(Turn::assistant_text(note));
        self.observer.on_event(ConversationEvent::StatusNote {
            text: note.to_string(),
        });
        self.state = OrchestratorState::Cancelled;
        tracing::info!("conversation run cancelled");
        RunOutcome::Cancelled
    }

    fn finish_failed(&mut self, message: String, partial: Option<Turn>) -> RunOutcome {
        if let Some(turn) = partial {
            self.observer.on_event(ConversationEvent::TurnCompleted {
                turn: turn.clone(),
            });
            self.conversation.push(turn);
        }
        let note = format!("[Error: {message}]");
        self.conversation.push(Turn::assistant_text(&note));
        self.observer.on_event(ConversationEvent::Failed {
            message: message.clone(),
        });
        self.observer
            .on_event(ConversationEvent::StatusNote { text: note });
        self.state = OrchestratorState::Failed;
        tracing::error!(%message, "conversation run failed");
        RunOutcome::Failed { message }
    }
}

fn placeholder_result(request_id: &str, note: &str) -> ContentFragment {
    ContentFragment::tool_result(request_id, vec![ContentFragment::text(note)], true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn assistant_with_request(id: &str) -> Turn {
        Turn::assistant(vec![
            ContentFragment::text("let me check"),
            ContentFragment::tool_use(id, "take_screenshot", Map::new()),
        ])
    }

    fn orchestrator() -> Orchestrator {
        struct DeadTransport;
        #[async_trait::async_trait]
        impl Transport for DeadTransport {
            async fn open_turn(
                &mut self,
                _request: TurnRequest<'_>,
            ) -> BobbinResult<crate::protocol::EventStream> {
                Ok(Box::pin(futures::stream::empty()))
            }
        }
        Orchestrator::new(
            Box::new(DeadTransport),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::new("test"),
        )
    }

    #[test]
    fn test_repair_inserts_missing_result_turn() {
        let mut orch = orchestrator();
        orch.conversation.push(Turn::user_text("hi"));
        orch.conversation.push(assistant_with_request("t1"));

        orch.repair_conversation();

        assert_eq!(orch.conversation.len(), 3);
        match &orch.conversation[2].content[0] {
            ContentFragment::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(is_error);
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn test_repair_prepends_to_existing_user_turn() {
        let mut orch = orchestrator();
        orch.conversation.push(assistant_with_request("t1"));
        orch.conversation.push(Turn::user_text("keep going"));

        orch.repair_conversation();

        assert_eq!(orch.conversation.len(), 2);
        let content = &orch.conversation[1].content;
        assert!(matches!(content[0], ContentFragment::ToolResult { .. }));
        assert_eq!(content[1].as_text(), Some("keep going"));
    }

    #[test]
    fn test_repair_leaves_answered_requests_alone() {
        let mut orch = orchestrator();
        orch.conversation.push(assistant_with_request("t1"));
        orch.conversation.push(Turn::user(vec![
            ContentFragment::tool_result("t1", vec![ContentFragment::text("ok")], false),
        ]));

        orch.repair_conversation();

        assert_eq!(orch.conversation.len(), 2);
        assert_eq!(orch.conversation[1].content.len(), 1);
    }

    #[test]
    fn test_repair_handles_multiple_missing_ids() {
        let mut orch = orchestrator();
        orch.conversation.push(Turn::assistant(vec![
            ContentFragment::tool_use("t1", "a", Map::new()),
            ContentFragment::tool_use("t2", "b", Map::new()),
        ]));
        orch.conversation.push(Turn::user(vec![
            ContentFragment::tool_result("t2", vec![ContentFragment::text("ok")], false),
        ]));

        orch.repair_conversation();

        let content = &orch.conversation[1].content;
        assert_eq!(content.len(), 2);
        match &content[0] {
            ContentFragment::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "t1"),
            other => panic!("unexpected fragment: {other:?}"),
        }
    }
}
