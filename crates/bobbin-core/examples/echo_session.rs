//! Minimal end-to-end session against the live model API
//!
//! Registers one `echo` tool and sends a single user message, printing
//! streamed text as it arrives. Requires `ANTHROPIC_API_KEY`.
//!
//! ```sh
//! cargo run --example echo_session
//! ```

use async_trait::async_trait;
use bobbin_core::{
    ApiConfig, ChannelObserver, ConversationEvent, ExecutionContext, HttpTransport, Orchestrator,
    OrchestratorConfig, Tool, ToolError, ToolOutput, ToolParameter, ToolRegistry, ToolSpec,
};
use serde_json::{Map, Value};
use std::sync::Arc;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the given text"
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
            .ok_or_else(|| ToolError::invalid_arguments("missing 'text'"))?;
        Ok(ToolOutput::text(text))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bobbin_core=info".into()),
        )
        .init();

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));

    let transport = HttpTransport::new(ApiConfig::new("claude-opus-4-6"));
    let (observer, mut events) = ChannelObserver::channel();

    let mut orchestrator = Orchestrator::new(
        Box::new(transport),
        Arc::new(registry),
        OrchestratorConfig::new("You are a terse assistant. Use the echo tool when asked."),
    )
    .with_observer(Arc::new(observer));

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConversationEvent::TextDelta { text } => print!("{text}"),
                ConversationEvent::ToolStarted { name, .. } => {
                    println!("\n[running tool: {name}]")
                }
                ConversationEvent::StatusNote { text } => println!("\n{text}"),
                _ => {}
            }
        }
    });

    let outcome = orchestrator
        .send_user_message("Please echo the word 'bobbin' back to me.")
        .await?;
    println!("\noutcome: {outcome:?}");

    orchestrator.shutdown().await?;
    drop(orchestrator);
    printer.await?;
    Ok(())
}
