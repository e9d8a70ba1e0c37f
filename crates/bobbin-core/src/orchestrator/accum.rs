//! Turn-scoped accumulation of streamed fragments

use crate::conversation::{ContentFragment, Turn};
use crate::protocol::{BlockKind, StreamEvent, TurnUsage};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A tool invocation still being assembled from streamed JSON fragments
#[derive(Debug)]
struct PendingToolCall {
    id: String,
    name: String,
    input_json: String,
}

/// A fully assembled tool invocation ready for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    /// Tool invocation id from the wire
    pub id: String,
    /// Tool name
    pub name: String,
    /// Parsed input object
    pub input: Map<String, Value>,
}

/// Accumulates one streamed model turn into its final fragments
///
/// Tool blocks are keyed by block index in a `BTreeMap`, so iterating
/// them yields ascending index order, which is the dispatch order the
/// orchestrator guarantees.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    text: String,
    tool_blocks: BTreeMap<usize, PendingToolCall>,
    stopped: BTreeSet<usize>,
    stop_reason: Option<String>,
    usage: TurnUsage,
}

impl TurnAccumulator {
    /// Create an empty accumulator for a fresh turn
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event
    ///
    /// `TurnEnd` and `Error` carry no accumulation state and are handled
    /// by the caller.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::BlockStart {
                index,
                kind: BlockKind::ToolUse,
                id,
                name,
            } => {
                self.tool_blocks.insert(
                    *index,
                    PendingToolCall {
                        id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    },
                );
            }
            StreamEvent::BlockStart { .. } => {}
            StreamEvent::TextDelta { index, text } => {
                if self.stopped.contains(index) {
                    tracing::warn!(index, "dropping text delta after block stop");
                    return;
                }
                self.text.push_str(text);
            }
            StreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if self.stopped.contains(index) {
                    tracing::warn!(index, "dropping input delta after block stop");
                    return;
                }
                match self.tool_blocks.get_mut(index) {
                    Some(block) => block.input_json.push_str(partial_json),
                    None => tracing::warn!(index, "dropping input delta for unknown block"),
                }
            }
            StreamEvent::BlockStop { index } => {
                self.stopped.insert(*index);
            }
            StreamEvent::TurnDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason.clone();
                }
                if let Some(usage) = usage {
                    self.usage = *usage;
                }
            }
            StreamEvent::TurnEnd | StreamEvent::Error { .. } => {}
        }
    }

    /// The last stop reason seen
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Usage counters for this turn
    pub fn usage(&self) -> TurnUsage {
        self.usage
    }

    /// Assemble the assistant turn and its prepared tool calls
    ///
    /// Returns `None` for the turn when nothing accumulated. Unparseable
    /// tool input falls back to an empty object; it never aborts the turn.
    pub fn finish(self) -> (Option<Turn>, Vec<PreparedCall>) {
        let calls: Vec<PreparedCall> = self
            .tool_blocks
            .into_values()
            .map(|block| {
                let input = parse_input(&block.name, &block.input_json);
                PreparedCall {
                    id: block.id,
                    name: block.name,
                    input,
                }
            })
            .collect();

        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentFragment::text(self.text));
        }
        for call in &calls {
            content.push(ContentFragment::tool_use(
                call.id.clone(),
                call.name.clone(),
                call.input.clone(),
            ));
        }

        let turn = if content.is_empty() {
            None
        } else {
            Some(Turn::assistant(content))
        };
        (turn, calls)
    }
}

fn parse_input(name: &str, input_json: &str) -> Map<String, Value> {
    if input_json.is_empty() {
        return Map::new();
    }
    match serde_json::from_str(input_json) {
        Ok(input) => input,
        Err(error) => {
            tracing::warn!(tool = name, %error, "tool input did not parse, using empty object");
            Map::new()
        }
    }
}
