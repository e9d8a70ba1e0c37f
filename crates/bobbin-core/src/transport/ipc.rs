//! Child-process transport speaking line-delimited JSON
//!
//! Spawns the agent child once per session and keeps three channels:
//! stdin for outbound commands, stdout for inbound events, stderr for
//! freeform diagnostics (drained and logged, never parsed). Each message
//! is one JSON object on one `\n`-terminated line.
//!
//! The child holds its own conversation history, so only new user text is
//! forwarded; session bootstrap data (screenshot, element codes, page
//! URL) travels inside the `init` message rather than as a `user_message`.
//! Hosts using this transport should therefore pass bootstrap state via
//! [`IpcSessionOptions`] and start the orchestrator with `run()` instead
//! of pushing a bootstrap turn.

use crate::conversation::{ContentFragment, ElementCode, Role};
use crate::error::{BobbinError, BobbinResult};
use crate::protocol::{BlockKind, EventStream, StreamEvent, STOP_REASON_TOOL_USE};
use crate::transport::{Transport, TurnRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Reassembles newline-delimited frames from arbitrary read chunks
///
/// All but the last split segment of a chunk are complete lines; the last
/// segment is carried over until the next chunk (or flushed at EOF).
/// Blank lines are skipped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            raw.pop(); // trailing \n
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if let Some(line) = decode_line(raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush any carry-over as a final line (call at stream end)
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        decode_line(raw)
    }
}

fn decode_line(raw: Vec<u8>) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match String::from_utf8(raw) {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(line),
        Err(error) => {
            tracing::warn!(%error, "skipping non-UTF-8 line from agent process");
            None
        }
    }
}

/// Messages the child sends on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A model response stream is starting
    StreamingStart,
    /// Incremental response text
    TextDelta { text: String },
    /// The response stream finished
    StreamingEnd,
    /// Full response text, sent after the deltas; redundant here
    AssistantMessage { text: String },
    /// The model requested a tool; the child blocks until `tool_result`
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    /// The child's tool-use loop finished
    Done,
    /// The child hit a terminal error
    Error { message: String },
}

/// Result payload of an outbound `tool_result` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    /// Text portion of the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 image portion of the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// MIME type of the image portion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Whether the tool failed
    #[serde(default)]
    pub is_error: bool,
}

/// Messages the parent sends on the child's stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Session bootstrap; sent exactly once, before anything else
    Init {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot_base64: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot_media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        element_codes: Vec<ElementCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_url: Option<String>,
    },
    /// A user chat message
    UserMessage { text: String },
    /// Reply to a `tool_use`, keyed by the originating tool id
    ToolResult { id: String, result: ToolResultPayload },
    /// Ask the child to stop the current turn
    Cancel,
}

/// Bootstrap data delivered to the child in the `init` message
#[derive(Debug, Clone, Default)]
pub struct IpcSessionOptions {
    /// API key the child uses for its own model client
    pub api_key: String,
    /// Base64 screenshot of the target window
    pub screenshot_base64: Option<String>,
    /// MIME type of the screenshot
    pub screenshot_media_type: Option<String>,
    /// Labeled on-screen elements
    pub element_codes: Vec<ElementCode>,
    /// Current page URL when the target is a browser
    pub page_url: Option<String>,
}

impl IpcSessionOptions {
    /// Create options with just an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Attach a base64 screenshot
    pub fn with_screenshot(
        mut self,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.screenshot_media_type = Some(media_type.into());
        self.screenshot_base64 = Some(data.into());
        self
    }

    /// Attach the labeled element listing
    pub fn with_element_codes(mut self, element_codes: Vec<ElementCode>) -> Self {
        self.element_codes = element_codes;
        self
    }

    /// Attach the current page URL
    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    fn into_message(self) -> OutboundMessage {
        OutboundMessage::Init {
            api_key: self.api_key,
            screenshot_base64: self.screenshot_base64,
            screenshot_media_type: self.screenshot_media_type,
            element_codes: self.element_codes,
            page_url: self.page_url,
        }
    }
}

/// Transport over a spawned agent child process
pub struct ChildTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    /// Consumed when `init` is sent on the first `open_turn`
    pending_init: Option<IpcSessionOptions>,
    /// How many conversation turns have already been forwarded
    forwarded_turns: usize,
    grace: Duration,
}

impl ChildTransport {
    /// Spawn the agent child process
    pub async fn spawn(
        command: impl AsRef<str>,
        args: &[impl AsRef<str>],
        options: IpcSessionOptions,
    ) -> BobbinResult<Self> {
        let mut cmd = Command::new(command.as_ref());
        cmd.args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            BobbinError::transport(format!(
                "failed to spawn agent process '{}': {e}",
                command.as_ref()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BobbinError::transport("failed to get agent stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BobbinError::transport("failed to get agent stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BobbinError::transport("failed to get agent stderr handle"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(stdout, tx));
        tokio::spawn(drain_diagnostics(stderr));

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            inbound: Arc::new(Mutex::new(rx)),
            pending_init: Some(options),
            forwarded_turns: 0,
            grace: Duration::from_secs(5),
        })
    }

    /// Set the grace period allowed between `cancel` and a forced kill
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn write_message(&mut self, message: &OutboundMessage) -> BobbinResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BobbinError::transport("agent process is closed"))?;

        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BobbinError::transport(format!("agent write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| BobbinError::transport(format!("agent flush failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for ChildTransport {
    async fn open_turn(&mut self, request: TurnRequest<'_>) -> BobbinResult<EventStream> {
        if let Some(options) = self.pending_init.take() {
            self.write_message(&options.into_message()).await?;
        }

        while self.forwarded_turns < request.turns.len() {
            let turn = &request.turns[self.forwarded_turns];
            self.forwarded_turns += 1;

            // The child builds its own assistant history from the model,
            // and tool results were already replied on the wire.
            if turn.role != Role::User {
                continue;
            }
            if turn
                .content
                .iter()
                .all(|f| matches!(f, ContentFragment::ToolResult { .. }))
            {
                continue;
            }

            let text = turn.text();
            if text.is_empty() {
                tracing::warn!("skipping user turn with no text for the pipe transport");
                continue;
            }
            self.write_message(&OutboundMessage::UserMessage { text })
                .await?;
        }

        Ok(turn_event_stream(self.inbound.clone()))
    }

    async fn send_tool_result(&mut self, fragment: &ContentFragment) -> BobbinResult<()> {
        let (id, result) = match fragment {
            ContentFragment::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let texts: Vec<&str> = content
                    .iter()
                    .filter_map(ContentFragment::as_text)
                    .collect();
                let image = content.iter().find_map(|f| match f {
                    ContentFragment::Image { source } => {
                        Some((source.media_type.clone(), source.data.clone()))
                    }
                    _ => None,
                });
                let payload = ToolResultPayload {
                    text: if texts.is_empty() {
                        None
                    } else {
                        Some(texts.join("\n"))
                    },
                    image_base64: image.as_ref().map(|(_, data)| data.clone()),
                    media_type: image.map(|(media_type, _)| media_type),
                    is_error: *is_error,
                };
                (tool_use_id.clone(), payload)
            }
            _ => {
                return Err(BobbinError::invalid_input(
                    "send_tool_result requires a tool_result fragment",
                ))
            }
        };

        self.write_message(&OutboundMessage::ToolResult { id, result })
            .await
    }

    async fn shutdown(&mut self) -> BobbinResult<()> {
        if self.stdin.is_some() {
            // Best effort; the child may already be gone.
            let _ = self.write_message(&OutboundMessage::Cancel).await;
        }
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                result = child.wait() => match result {
                    Ok(status) => tracing::debug!(%status, "agent process exited"),
                    Err(error) => tracing::warn!(%error, "failed waiting for agent process"),
                },
                _ = tokio::time::sleep(self.grace) => {
                    tracing::warn!("agent process did not exit in time, killing it");
                    child.kill().await.ok();
                }
            }
        }
        Ok(())
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

async fn read_events(mut stdout: ChildStdout, tx: mpsc::UnboundedSender<InboundMessage>) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.feed(&buf[..n]) {
                    forward_line(&line, &tx);
                }
            }
            Err(error) => {
                tracing::warn!(%error, "agent stdout read failed");
                break;
            }
        }
    }
    if let Some(line) = assembler.finish() {
        forward_line(&line, &tx);
    }
    // Dropping the sender closes the channel; readers see session end.
}

fn forward_line(line: &str, tx: &mpsc::UnboundedSender<InboundMessage>) {
    match serde_json::from_str::<InboundMessage>(line) {
        Ok(message) => {
            if tx.send(message).is_err() {
                tracing::debug!("inbound channel closed, dropping agent message");
            }
        }
        Err(error) => {
            tracing::warn!(%error, "ignoring unrecognized agent message");
        }
    }
}

async fn drain_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "bobbin::agent", "{line}"),
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(%error, "agent stderr read failed");
                break;
            }
        }
    }
}

struct TurnStreamState {
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    queue: VecDeque<StreamEvent>,
    next_tool_index: usize,
    text_block_open: bool,
    finished: bool,
}

/// View of the inbound channel as one logical model turn
///
/// The child runs at most one tool request per round and blocks until its
/// result, so each `tool_use` (and each `done`/`error`) terminates a
/// logical turn here; the orchestrator dispatches, replies, and opens the
/// next view over the same channel.
fn turn_event_stream(inbound: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>) -> EventStream {
    let state = TurnStreamState {
        inbound,
        queue: VecDeque::new(),
        next_tool_index: 1,
        text_block_open: false,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            let message = { state.inbound.lock().await.recv().await };
            match message {
                Some(message) => map_inbound(&mut state, message),
                None => {
                    state.finished = true;
                    state.queue.push_back(StreamEvent::Error {
                        message: "agent process ended unexpectedly".to_string(),
                    });
                }
            }
        }
    }))
}

fn map_inbound(state: &mut TurnStreamState, message: InboundMessage) {
    match message {
        InboundMessage::StreamingStart => {
            state.text_block_open = true;
            state.queue.push_back(StreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
                id: None,
                name: None,
            });
        }
        InboundMessage::TextDelta { text } => {
            state
                .queue
                .push_back(StreamEvent::TextDelta { index: 0, text });
        }
        InboundMessage::StreamingEnd => {
            if state.text_block_open {
                state.text_block_open = false;
                state.queue.push_back(StreamEvent::BlockStop { index: 0 });
            }
        }
        InboundMessage::AssistantMessage { text } => {
            // Deltas already carried the text.
            tracing::debug!(chars = text.len(), "agent sent full assistant text");
        }
        InboundMessage::ToolUse { id, name, input } => {
            if state.text_block_open {
                state.text_block_open = false;
                state.queue.push_back(StreamEvent::BlockStop { index: 0 });
            }
            let index = state.next_tool_index;
            state.next_tool_index += 1;
            let partial_json =
                serde_json::to_string(&Value::Object(input)).unwrap_or_else(|_| "{}".to_string());
            state.queue.push_back(StreamEvent::BlockStart {
                index,
                kind: BlockKind::ToolUse,
                id: Some(id),
                name: Some(name),
            });
            state
                .queue
                .push_back(StreamEvent::InputJsonDelta {
                    index,
                    partial_json,
                });
            state.queue.push_back(StreamEvent::BlockStop { index });
            state.queue.push_back(StreamEvent::TurnDelta {
                stop_reason: Some(STOP_REASON_TOOL_USE.to_string()),
                usage: None,
            });
            state.queue.push_back(StreamEvent::TurnEnd);
            state.finished = true;
        }
        InboundMessage::Done => {
            if state.text_block_open {
                state.text_block_open = false;
                state.queue.push_back(StreamEvent::BlockStop { index: 0 });
            }
            state.queue.push_back(StreamEvent::TurnDelta {
                stop_reason: Some("end_turn".to_string()),
                usage: None,
            });
            state.queue.push_back(StreamEvent::TurnEnd);
            state.finished = true;
        }
        InboundMessage::Error { message } => {
            state.queue.push_back(StreamEvent::Error { message });
            state.finished = true;
        }
    }
}
