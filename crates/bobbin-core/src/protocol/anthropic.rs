//! Mapping from decoded provider events to [`StreamEvent`]
//!
//! Event names follow the provider's streaming message schema:
//! `message_start`, `content_block_start`, `content_block_delta`,
//! `content_block_stop`, `message_delta`, `message_stop`, `error`.
//! Unknown names are ignored and malformed data lines are dropped;
//! neither aborts the stream.

use crate::protocol::sse::SseEvent;
use crate::protocol::{BlockKind, StreamEvent, TurnUsage};
use serde_json::Value;

/// Stateful mapper for one streamed model turn
///
/// Holds the usage counters seen so far, since the wire splits them
/// between `message_start` (input) and `message_delta` (output).
#[derive(Debug, Default)]
pub struct EventMapper {
    input_tokens: u32,
    output_tokens: u32,
}

impl EventMapper {
    /// Create a mapper for a fresh turn
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage counters accumulated so far
    pub fn usage(&self) -> TurnUsage {
        TurnUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    /// Map one decoded event; most wire events yield zero or one
    /// [`StreamEvent`]
    pub fn map(&mut self, event: &SseEvent) -> Option<StreamEvent> {
        let data: Value = match serde_json::from_str(&event.data) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "dropping malformed event data line");
                return None;
            }
        };

        // The event name is carried both as an SSE field and inside the
        // payload; prefer the field, fall back to the payload.
        let event_type = event
            .event_type
            .as_deref()
            .or_else(|| data["type"].as_str());

        match event_type {
            Some("message_start") => {
                if let Some(input) = data["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = input as u32;
                }
                None
            }
            Some("content_block_start") => {
                let index = block_index(&data)?;
                let kind = data["content_block"]["type"]
                    .as_str()
                    .map(BlockKind::from_wire)
                    .unwrap_or(BlockKind::Other);
                let (id, name) = if kind == BlockKind::ToolUse {
                    (
                        data["content_block"]["id"].as_str().map(String::from),
                        data["content_block"]["name"].as_str().map(String::from),
                    )
                } else {
                    (None, None)
                };
                Some(StreamEvent::BlockStart {
                    index,
                    kind,
                    id,
                    name,
                })
            }
            Some("content_block_delta") => {
                let index = block_index(&data)?;
                match data["delta"]["type"].as_str() {
                    Some("text_delta") => {
                        data["delta"]["text"].as_str().map(|text| StreamEvent::TextDelta {
                            index,
                            text: text.to_string(),
                        })
                    }
                    Some("input_json_delta") => data["delta"]["partial_json"].as_str().map(
                        |partial_json| StreamEvent::InputJsonDelta {
                            index,
                            partial_json: partial_json.to_string(),
                        },
                    ),
                    other => {
                        tracing::trace!(delta_type = ?other, "ignoring unknown delta type");
                        None
                    }
                }
            }
            Some("content_block_stop") => {
                let index = block_index(&data)?;
                Some(StreamEvent::BlockStop { index })
            }
            Some("message_delta") => {
                if let Some(output) = data["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = output as u32;
                }
                Some(StreamEvent::TurnDelta {
                    stop_reason: data["delta"]["stop_reason"].as_str().map(String::from),
                    usage: Some(self.usage()),
                })
            }
            Some("message_stop") => Some(StreamEvent::TurnEnd),
            Some("error") => {
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error");
                Some(StreamEvent::Error {
                    message: message.to_string(),
                })
            }
            other => {
                tracing::trace!(event_type = ?other, "ignoring unknown stream event");
                None
            }
        }
    }
}

fn block_index(data: &Value) -> Option<usize> {
    let index = data["index"].as_u64();
    if index.is_none() {
        tracing::warn!("dropping block event without an index");
    }
    index.map(|i| i as usize)
}
