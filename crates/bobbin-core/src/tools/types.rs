//! Tool declaration and output types

use crate::conversation::ContentFragment;
use serde_json::{json, Map, Value};

/// Parameter descriptor for a tool
#[derive(Debug, Clone)]
pub struct ToolParameter {
    /// Parameter name
    pub name: String,
    /// Parameter description
    pub description: String,
    /// JSON schema type (string, integer, boolean, object, array)
    pub param_type: String,
    /// Whether this parameter is required
    pub required: bool,
    /// Allowed values, if constrained
    pub enum_values: Option<Vec<Value>>,
    /// Element type for array parameters
    pub item_type: Option<String>,
}

impl ToolParameter {
    fn new(name: impl Into<String>, description: impl Into<String>, param_type: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type: param_type.to_string(),
            required: true,
            enum_values: None,
            item_type: None,
        }
    }

    /// Create a required string parameter
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, "string")
    }

    /// Create a required integer parameter
    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, "integer")
    }

    /// Create a required boolean parameter
    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, "boolean")
    }

    /// Create a required object parameter
    pub fn object(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, "object")
    }

    /// Create a required array parameter with the given element type
    pub fn array(
        name: impl Into<String>,
        description: impl Into<String>,
        item_type: &str,
    ) -> Self {
        let mut param = Self::new(name, description, "array");
        param.item_type = Some(item_type.to_string());
        param
    }

    /// Create a required string parameter constrained to the given values
    pub fn string_enum(
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
    ) -> Self {
        let mut param = Self::new(name, description, "string");
        param.enum_values = Some(values.iter().map(|v| json!(v)).collect());
        param
    }

    /// Make this parameter optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Declarative description of a tool, sent to the model so it knows what
/// it may call
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input parameter descriptors
    pub parameters: Vec<ToolParameter>,
}

impl ToolSpec {
    /// Create a new tool spec
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ToolParameter>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Build the JSON schema for this tool's input object
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            if param.required {
                required.push(json!(param.name));
            }

            let mut schema = Map::new();
            schema.insert("type".to_string(), json!(param.param_type));
            schema.insert("description".to_string(), json!(param.description));
            if let Some(values) = &param.enum_values {
                schema.insert("enum".to_string(), json!(values));
            }
            if let Some(item_type) = &param.item_type {
                schema.insert("items".to_string(), json!({"type": item_type}));
            }
            properties.insert(param.name.clone(), Value::Object(schema));
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Serialize into the wire shape included in an outbound model request
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema(),
        })
    }
}

/// What a tool execution produced: content fragments plus an error flag
///
/// This is the executor-boundary shape; the registry converts it into a
/// `tool_result` fragment keyed by the originating request id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Result content (text and/or images, never nested tool results)
    pub content: Vec<ContentFragment>,
    /// Whether the execution failed
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful text output
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentFragment::text(text)],
            is_error: false,
        }
    }

    /// Create a failed output carrying an error message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentFragment::text(message)],
            is_error: true,
        }
    }

    /// Create a successful image output
    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            content: vec![ContentFragment::image(media_type, data)],
            is_error: false,
        }
    }

    /// Append a text fragment
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(ContentFragment::text(text));
        self
    }

    /// Append an image fragment
    pub fn with_image(
        mut self,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.content.push(ContentFragment::image(media_type, data));
        self
    }

    /// Convert into a `tool_result` fragment answering `request_id`
    ///
    /// Empty output gains a `(no output)` note so the reply is never blank.
    pub fn into_fragment(self, request_id: impl Into<String>) -> ContentFragment {
        let content = if self.content.is_empty() {
            vec![ContentFragment::text("(no output)")]
        } else {
            self.content
        };
        ContentFragment::tool_result(request_id, content, self.is_error)
    }
}
