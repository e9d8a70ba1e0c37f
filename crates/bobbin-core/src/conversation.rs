//! Conversation data model: turns and their content fragments
//!
//! Fragments serialize directly into the provider wire shapes (`text`,
//! `image`, `tool_use`, `tool_result`), so a `&[Turn]` slice can be dropped
//! into an outbound request body without a conversion layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a turn in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User turn (human input or tool results)
    User,
    /// Assistant turn (model output)
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Base64 image payload in the provider's nested `source` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Source encoding; always `"base64"` here
    #[serde(rename = "type")]
    pub source_type: String,
    /// MIME type, e.g. `"image/png"`
    pub media_type: String,
    /// Base64-encoded image bytes
    pub data: String,
}

impl ImageSource {
    /// Create a base64 image source
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// One unit of turn content
///
/// A `ToolResult` never contains another `ToolResult`; the constructors
/// uphold this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentFragment {
    /// Plain text
    Text { text: String },
    /// Inline image
    Image { source: ImageSource },
    /// A tool invocation requested by the model
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    /// The host's reply to a tool invocation
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentFragment>,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentFragment {
    /// Create a text fragment
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a base64 image fragment
    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::base64(media_type, data),
        }
    }

    /// Create a tool invocation fragment
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Map<String, Value>,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool result fragment
    ///
    /// Nested tool results are stripped from `content` to keep the
    /// fragment wire-valid.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: Vec<ContentFragment>,
        is_error: bool,
    ) -> Self {
        let content = content
            .into_iter()
            .filter(|fragment| !matches!(fragment, ContentFragment::ToolResult { .. }))
            .collect();
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }

    /// Get the text if this is a text fragment
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentFragment::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check whether this is a tool invocation fragment
    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentFragment::ToolUse { .. })
    }
}

/// One role-attributed unit of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,
    /// Ordered content fragments
    pub content: Vec<ContentFragment>,
}

impl Turn {
    /// Create a user turn
    pub fn user(content: Vec<ContentFragment>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Create a user turn holding a single text fragment
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentFragment::text(text)])
    }

    /// Create an assistant turn
    pub fn assistant(content: Vec<ContentFragment>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create an assistant turn holding a single text fragment
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentFragment::text(text)])
    }

    /// Concatenate all text fragments in order
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentFragment::as_text)
            .collect()
    }

    /// IDs of every tool invocation in this turn, in fragment order
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|fragment| match fragment {
                ContentFragment::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Check whether this turn requests any tool invocation
    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(ContentFragment::is_tool_use)
    }
}

/// A labeled on-screen element, as supplied by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementCode {
    /// Two-letter element code, e.g. `"AA"`
    pub code: String,
    /// Element kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Accessibility label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Accessibility role, used as a label fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ElementCode {
    fn describe(&self) -> String {
        let kind = self.kind.as_deref().unwrap_or("?");
        let label = self
            .label
            .as_deref()
            .or(self.role.as_deref())
            .unwrap_or("?");
        format!("[{}] {}: \"{}\"", self.code, kind, label)
    }
}

/// Builds the opening user turn of a session from host-captured state
///
/// Fragment order: screenshot, element listing, page URL, closing prompt.
#[derive(Debug, Clone, Default)]
pub struct SessionBootstrap {
    screenshot: Option<(String, String)>,
    element_codes: Vec<ElementCode>,
    page_url: Option<String>,
}

impl SessionBootstrap {
    /// Create an empty bootstrap
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a base64 screenshot
    pub fn with_screenshot(
        mut self,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.screenshot = Some((media_type.into(), data.into()));
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

    /// Assemble the opening user turn
    pub fn into_turn(self) -> Turn {
        let mut content = Vec::new();
        if let Some((media_type, data)) = self.screenshot {
            content.push(ContentFragment::image(media_type, data));
        }
        if !self.element_codes.is_empty() {
            let listing = self
                .element_codes
                .iter()
                .map(ElementCode::describe)
                .collect::<Vec<_>>()
                .join("\n");
            content.push(ContentFragment::text(format!("Element codes:\n{listing}")));
        }
        if let Some(url) = self.page_url {
            content.push(ContentFragment::text(format!("Page URL: {url}")));
        }
        content.push(ContentFragment::text(
            "Here is the current state of the window. What do you see?",
        ));
        Turn::user(content)
    }
}
