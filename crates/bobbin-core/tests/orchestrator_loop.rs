//! Integration tests for the conversation loop over a scripted transport

use async_trait::async_trait;
use bobbin_core::orchestrator::{Orchestrator, RunOutcome};
use bobbin_core::protocol::{BlockKind, EventStream, StreamEvent};
use bobbin_core::tools::{
    ExecutionContext, Tool, ToolError, ToolOutput, ToolParameter, ToolRegistry, ToolSpec,
};
use bobbin_core::transport::{Transport, TurnRequest};
use bobbin_core::{ContentFragment, OrchestratorConfig, OrchestratorState, Turn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Transport that replays pre-scripted event sequences and records what
/// the orchestrator sends
struct ScriptedTransport {
    scripts: VecDeque<Vec<StreamEvent>>,
    /// Replayed once the queue is exhausted
    repeat: Option<Vec<StreamEvent>>,
    requests: Arc<Mutex<Vec<Vec<Turn>>>>,
    delivered_results: Arc<Mutex<Vec<ContentFragment>>>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: scripts.into(),
            repeat: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            delivered_results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn repeating(script: Vec<StreamEvent>) -> Self {
        Self {
            scripts: VecDeque::new(),
            repeat: Some(script),
            requests: Arc::new(Mutex::new(Vec::new())),
            delivered_results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requests_handle(&self) -> Arc<Mutex<Vec<Vec<Turn>>>> {
        self.requests.clone()
    }

    fn results_handle(&self) -> Arc<Mutex<Vec<ContentFragment>>> {
        self.delivered_results.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_turn(
        &mut self,
        request: TurnRequest<'_>,
    ) -> bobbin_core::BobbinResult<EventStream> {
        self.requests.lock().push(request.turns.to_vec());
        let script = self
            .scripts
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(script)))
    }

    async fn send_tool_result(
        &mut self,
        fragment: &ContentFragment,
    ) -> bobbin_core::BobbinResult<()> {
        self.delivered_results.lock().push(fragment.clone());
        Ok(())
    }
}

/// Transport whose stream never yields, for cancellation tests
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn open_turn(
        &mut self,
        _request: TurnRequest<'_>,
    ) -> bobbin_core::BobbinResult<EventStream> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

struct EchoTool {
    executions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input text"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "echo",
            self.description(),
            vec![ToolParameter::string("text", "The text to echo")],
        )
    }

    async fn execute(
        &self,
        input: &Map<String, Value>,
        _context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let text = input
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.executions.lock().push(text.clone());
        Ok(ToolOutput::text(text))
    }
}

fn text_block(index: usize, text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::BlockStart {
            index,
            kind: BlockKind::Text,
            id: None,
            name: None,
        },
        StreamEvent::TextDelta {
            index,
            text: text.to_string(),
        },
        StreamEvent::BlockStop { index },
    ]
}

fn tool_block(index: usize, id: &str, name: &str, input_json: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::BlockStart {
            index,
            kind: BlockKind::ToolUse,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
        },
        StreamEvent::InputJsonDelta {
            index,
            partial_json: input_json.to_string(),
        },
        StreamEvent::BlockStop { index },
    ]
}

fn turn_end(stop_reason: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TurnDelta {
            stop_reason: Some(stop_reason.to_string()),
            usage: None,
        },
        StreamEvent::TurnEnd,
    ]
}

fn plain_text_script(text: &str) -> Vec<StreamEvent> {
    let mut script = text_block(0, text);
    script.extend(turn_end("end_turn"));
    script
}

fn registry_with_echo() -> (Arc<ToolRegistry>, Arc<Mutex<Vec<String>>>) {
    let executions = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool {
        executions: executions.clone(),
    }));
    (Arc::new(registry), executions)
}

#[tokio::test]
async fn test_echo_round_trip() {
    // One turn requesting echo("hi"), then a closing text turn.
    let mut first = text_block(0, "Sure, ");
    // The model leaves the text block open until the turn ends; only the
    // tool block is stopped before the stop reason arrives.
    first.remove(2);
    first.extend(tool_block(1, "t1", "echo", r#"{"text":"hi"}"#));
    first.extend(turn_end("tool_use"));

    let transport = ScriptedTransport::new(vec![first, plain_text_script("Done.")]);
    let requests = transport.requests_handle();
    let (registry, executions) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new("help"),
    );
    let outcome = orch.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(orch.state(), OrchestratorState::Done);
    assert_eq!(executions.lock().as_slice(), ["hi"]);

    // Two model round-trips were made.
    assert_eq!(requests.lock().len(), 2);

    let conversation = orch.conversation();
    assert_eq!(conversation.len(), 3);

    // Assistant turn: text plus the tool request.
    assert_eq!(conversation[0].text(), "Sure, ");
    match &conversation[0].content[1] {
        ContentFragment::ToolUse { id, name, input } => {
            assert_eq!(id, "t1");
            assert_eq!(name, "echo");
            assert_eq!(input["text"], "hi");
        }
        other => panic!("unexpected fragment: {other:?}"),
    }

    // User turn: the matching result.
    match &conversation[1].content[0] {
        ContentFragment::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_use_id, "t1");
            assert!(!is_error);
            assert_eq!(content[0].as_text(), Some("hi"));
        }
        other => panic!("unexpected fragment: {other:?}"),
    }

    // Closing assistant turn.
    assert_eq!(conversation[2].text(), "Done.");

    // The second request carried the first two turns.
    assert_eq!(requests.lock()[1].len(), 2);
}

#[tokio::test]
async fn test_dispatch_order_follows_block_index_not_stop_order() {
    let mut script = Vec::new();
    for (index, id) in [(0, "a"), (1, "b"), (2, "c")] {
        script.push(StreamEvent::BlockStart {
            index,
            kind: BlockKind::ToolUse,
            id: Some(id.to_string()),
            name: Some("echo".to_string()),
        });
        script.push(StreamEvent::InputJsonDelta {
            index,
            partial_json: format!(r#"{{"text":"{id}"}}"#),
        });
    }
    // Stops arrive out of order.
    for index in [2, 0, 1] {
        script.push(StreamEvent::BlockStop { index });
    }
    script.extend(turn_end("tool_use"));

    let transport = ScriptedTransport::new(vec![script, plain_text_script("ok")]);
    let (registry, executions) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new(""),
    );
    orch.run().await.unwrap();

    // Executed in request (block index) order.
    assert_eq!(executions.lock().as_slice(), ["a", "b", "c"]);

    // Result order matches request order too.
    let result_ids: Vec<String> = orch.conversation()[1]
        .content
        .iter()
        .filter_map(|fragment| match fragment {
            ContentFragment::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_loop_limit_is_enforced() {
    // Every round asks for another tool call.
    let mut script = tool_block(0, "t1", "echo", r#"{"text":"again"}"#);
    script.extend(turn_end("tool_use"));

    let transport = ScriptedTransport::repeating(script);
    let requests = transport.requests_handle();
    let (registry, executions) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new("").with_max_tool_loops(3),
    );
    let outcome = orch.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::LoopLimitReached);
    assert_eq!(requests.lock().len(), 3);
    assert_eq!(executions.lock().len(), 3);

    // Exactly one terminal status turn.
    let status_turns = orch
        .conversation()
        .iter()
        .filter(|turn| turn.text().contains("loop limit"))
        .count();
    assert_eq!(status_turns, 1);
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let (registry, executions) = registry_with_echo();
    let mut orch = Orchestrator::new(
        Box::new(StalledTransport),
        registry,
        OrchestratorConfig::new(""),
    );

    let token = orch.cancel_token();
    let cancel_task = async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        // Cancelling twice is a no-op.
        token.cancel();
    };

    let (outcome, _) = tokio::join!(orch.run(), cancel_task);
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    assert_eq!(orch.state(), OrchestratorState::Cancelled);

    // No tools ran and exactly one status turn was appended.
    assert!(executions.lock().is_empty());
    let status_turns = orch
        .conversation()
        .iter()
        .filter(|turn| turn.text() == "[Stopped]")
        .count();
    assert_eq!(status_turns, 1);
    assert_eq!(orch.conversation().len(), 1);
}

#[tokio::test]
async fn test_run_after_cancel_starts_fresh() {
    let (registry, _) = registry_with_echo();
    let transport = ScriptedTransport::new(vec![plain_text_script("hello again")]);

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new(""),
    );

    // Cancel while idle, then run; the stale cancellation must not stop
    // the new run.
    orch.cancel_token().cancel();
    let outcome = orch.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(orch.conversation().last().unwrap().text(), "hello again");
}

#[tokio::test]
async fn test_stream_error_fails_without_dispatch() {
    let mut script = text_block(0, "Half an answer");
    script.pop(); // no block stop; the error cuts the stream short
    script.push(StreamEvent::Error {
        message: "overloaded".to_string(),
    });
    // Anything scripted afterwards must never be requested.
    let transport = ScriptedTransport::new(vec![script, plain_text_script("unreachable")]);
    let requests = transport.requests_handle();
    let (registry, executions) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new(""),
    );
    let outcome = orch.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Failed {
            message: "overloaded".to_string()
        }
    );
    assert_eq!(orch.state(), OrchestratorState::Failed);
    assert_eq!(requests.lock().len(), 1);
    assert!(executions.lock().is_empty());

    // Partial text was finalized, followed by one error note.
    let conversation = orch.conversation();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].text(), "Half an answer");
    assert!(conversation[1].text().starts_with("[Error:"));
}

#[tokio::test]
async fn test_unknown_tool_is_answered_and_loop_continues() {
    let mut first = tool_block(0, "t9", "nonexistent", "{}");
    first.extend(turn_end("tool_use"));
    let transport = ScriptedTransport::new(vec![first, plain_text_script("adapted")]);
    let results = transport.results_handle();
    let (registry, _) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new(""),
    );
    let outcome = orch.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    match &orch.conversation()[1].content[0] {
        ContentFragment::ToolResult {
            content, is_error, ..
        } => {
            assert!(is_error);
            assert!(content[0].as_text().unwrap().contains("nonexistent"));
        }
        other => panic!("unexpected fragment: {other:?}"),
    }
    // The error result still went to the transport before the next round.
    assert_eq!(results.lock().len(), 1);
}

#[tokio::test]
async fn test_user_message_flows_into_request() {
    let transport = ScriptedTransport::new(vec![plain_text_script("hello")]);
    let requests = transport.requests_handle();
    let (registry, _) = registry_with_echo();

    let mut orch = Orchestrator::new(
        Box::new(transport),
        registry,
        OrchestratorConfig::new("be brief"),
    );
    let outcome = orch.send_user_message("hi there").await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let recorded = requests.lock();
    assert_eq!(recorded[0].len(), 1);
    assert_eq!(recorded[0][0].text(), "hi there");
}
