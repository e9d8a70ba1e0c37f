//! The executable tool trait and its opaque host context

use crate::tools::error::ToolError;
use crate::tools::types::{ToolOutput, ToolSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Opaque bundle of host capabilities threaded through to tool executors
///
/// The orchestrator never inspects the payload; only the host's tools
/// know its concrete type and downcast it back out.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a context carrying the host's payload
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Some(Arc::new(payload)),
        }
    }

    /// Downcast the payload back to its concrete type
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Base trait for all tools
///
/// Tools are capabilities the model may invoke; each carries a schema the
/// model sees and execution logic running against the host.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. `"take_screenshot"`)
    fn name(&self) -> &str;

    /// Tool description for model understanding
    fn description(&self) -> &str;

    /// Declarative spec sent with model requests
    fn spec(&self) -> ToolSpec;

    /// Execute the tool with the given input object
    ///
    /// # Errors
    ///
    /// Returns `ToolError` when arguments are invalid or execution fails;
    /// the registry converts the error into an error-flagged result.
    async fn execute(
        &self,
        input: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;
}
