//! Tool declaration, execution and registry

pub mod error;
pub mod registry;
pub mod tool;
pub mod types;

pub use error::ToolError;
pub use registry::ToolRegistry;
pub use tool::{ExecutionContext, Tool};
pub use types::{ToolOutput, ToolParameter, ToolSpec};
