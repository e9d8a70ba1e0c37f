//! Streaming HTTP transport against the model API
//!
//! Posts the conversation to `/v1/messages` with `stream: true` and
//! adapts the `text/event-stream` response body through the SSE decoder
//! and event mapper into an [`EventStream`].

use crate::config::ApiConfig;
use crate::error::{BobbinError, BobbinResult};
use crate::protocol::anthropic::EventMapper;
use crate::protocol::sse::SseDecoder;
use crate::protocol::{EventStream, StreamEvent};
use crate::transport::{Transport, TurnRequest};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

/// Direct streaming client for the model API
pub struct HttpTransport {
    config: ApiConfig,
    client: Client,
}

impl HttpTransport {
    /// Create a transport from the given config
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a transport reusing an existing HTTP client
    pub fn with_client(config: ApiConfig, client: Client) -> Self {
        Self { config, client }
    }
}

/// Build the outbound request body for one turn
fn build_request_body(config: &ApiConfig, request: &TurnRequest<'_>) -> BobbinResult<Value> {
    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "stream": true,
        "messages": serde_json::to_value(request.turns)?,
    });

    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request.tools.iter().map(|spec| spec.to_wire()).collect();
        body["tools"] = Value::Array(tools);
    }

    Ok(body)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_turn(&mut self, request: TurnRequest<'_>) -> BobbinResult<EventStream> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = build_request_body(&self.config, &request)?;
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| BobbinError::config("no API key configured"))?;

        tracing::debug!(
            turns = request.turns.len(),
            tools = request.tools.len(),
            "opening model stream"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| BobbinError::transport(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(BobbinError::Http(format!(
                "model request returned {status}: {detail}"
            )));
        }

        // The decoder and mapper are driven from inside the flat_map
        // closure, which the executor may poll from any worker thread.
        let state = Arc::new(Mutex::new((SseDecoder::new(), EventMapper::new())));

        let stream = response.bytes_stream().flat_map(move |chunk| {
            let events: Vec<StreamEvent> = match chunk {
                Ok(bytes) => {
                    let mut guard = state.lock();
                    let (decoder, mapper) = &mut *guard;
                    decoder
                        .feed(&bytes)
                        .iter()
                        .filter_map(|event| mapper.map(event))
                        .collect()
                }
                Err(error) => vec![StreamEvent::Error {
                    message: format!("stream read failed: {error}"),
                }],
            };
            futures::stream::iter(events)
        });

        Ok(Box::pin(stream))
    }
}
