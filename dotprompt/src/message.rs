//! Conversation data model: roles, content parts, messages, and documents.
//!
//! These types describe the structured conversation a rendered prompt
//! produces. A [`Message`] belongs to a [`Role`] and carries an ordered list
//! of [`Part`]s; parts are a tagged variant covering text, structured data,
//! media references, tool traffic, and pending sections.
//!
//! All types serialize to the dotprompt wire shapes: parts are
//! discriminated by their payload key (`text`, `data`, `media`,
//! `toolRequest`, `toolResponse`) rather than an explicit tag field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message participant in a conversation.
///
/// Role markers accept any lowercase-letter sequence, so roles outside the
/// canonical set are preserved in the [`Role::Other`] variant rather than
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Role {
    /// System message providing instructions to the model.
    System,
    /// User message from the human.
    #[default]
    User,
    /// Model (assistant) message.
    Model,
    /// Tool response message.
    Tool,
    /// Any other lowercase role name emitted by a role marker.
    #[serde(untagged)]
    Other(String),
}

impl Role {
    /// Returns the string representation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Model => "model",
            Self::Tool => "tool",
            Self::Other(name) => name,
        }
    }

    /// Parses a role name from a role marker.
    ///
    /// Unknown names are preserved verbatim; marker grammar guarantees they
    /// are lowercase-letter sequences.
    #[must_use]
    pub fn from_marker(name: &str) -> Self {
        match name {
            "system" => Self::System,
            "user" => Self::User,
            "model" => Self::Model,
            "tool" => Self::Tool,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns `true` if this is a user role.
    #[inline]
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }

    /// Returns `true` if this is a model role.
    #[inline]
    #[must_use]
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media reference inside a [`Part::Media`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaContent {
    /// Media URL (http/https or data URL).
    pub url: String,

    /// MIME content type, when known.
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Name of the tool to invoke.
    pub name: String,

    /// Input payload for the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Correlation reference between request and response.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// The output of a completed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Name of the tool that produced the output.
    pub name: String,

    /// Output payload from the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Correlation reference between request and response.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A single content part within a message.
///
/// Exactly one payload per variant; discriminate on the variant, never on
/// field presence. Each variant optionally carries a metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Part {
    /// Plain text content.
    Text {
        /// The text string.
        text: String,
        /// Arbitrary part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// Structured data content.
    Data {
        /// The data payload.
        data: Value,
        /// Arbitrary part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// A media reference.
    Media {
        /// URL and optional content type.
        media: MediaContent,
        /// Arbitrary part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// A tool invocation requested by the model.
    ToolRequest {
        /// The request payload.
        #[serde(rename = "toolRequest")]
        tool_request: ToolRequest,
        /// Arbitrary part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// The output of a completed tool invocation.
    ToolResponse {
        /// The response payload.
        #[serde(rename = "toolResponse")]
        tool_response: ToolResponse,
        /// Arbitrary part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// A placeholder section to be filled in later; its metadata always
    /// carries `pending: true` and usually a `purpose`.
    Pending {
        /// Pending marker metadata.
        metadata: Map<String, Value>,
    },
}

impl Part {
    /// Creates a text part.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            metadata: None,
        }
    }

    /// Creates a data part.
    #[inline]
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self::Data {
            data,
            metadata: None,
        }
    }

    /// Creates a media part from a URL.
    #[inline]
    #[must_use]
    pub fn media(url: impl Into<String>) -> Self {
        Self::Media {
            media: MediaContent {
                url: url.into(),
                content_type: None,
            },
            metadata: None,
        }
    }

    /// Creates a media part with an explicit content type.
    #[must_use]
    pub fn media_with_type(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::Media {
            media: MediaContent {
                url: url.into(),
                content_type: Some(content_type.into()),
            },
            metadata: None,
        }
    }

    /// Creates a tool request part.
    #[must_use]
    pub fn tool_request(name: impl Into<String>, input: Option<Value>) -> Self {
        Self::ToolRequest {
            tool_request: ToolRequest {
                name: name.into(),
                input,
                reference: None,
            },
            metadata: None,
        }
    }

    /// Creates a tool response part.
    #[must_use]
    pub fn tool_response(name: impl Into<String>, output: Option<Value>) -> Self {
        Self::ToolResponse {
            tool_response: ToolResponse {
                name: name.into(),
                output,
                reference: None,
            },
            metadata: None,
        }
    }

    /// Creates a pending part with `pending: true` metadata.
    #[must_use]
    pub fn pending() -> Self {
        let mut metadata = Map::new();
        metadata.insert("pending".to_owned(), Value::Bool(true));
        Self::Pending { metadata }
    }

    /// Creates a pending part for a named section purpose.
    #[must_use]
    pub fn pending_with_purpose(purpose: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("purpose".to_owned(), Value::String(purpose.into()));
        metadata.insert("pending".to_owned(), Value::Bool(true));
        Self::Pending { metadata }
    }

    /// Returns the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Returns `true` if this is a text part.
    #[inline]
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Returns `true` if this is a media part.
    #[inline]
    #[must_use]
    pub const fn is_media(&self) -> bool {
        matches!(self, Self::Media { .. })
    }

    /// Returns `true` if this is a pending part.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Returns the part's metadata map, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Text { metadata, .. }
            | Self::Data { metadata, .. }
            | Self::Media { metadata, .. }
            | Self::ToolRequest { metadata, .. }
            | Self::ToolResponse { metadata, .. } => metadata.as_ref(),
            Self::Pending { metadata } => Some(metadata),
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,

    /// Ordered content parts.
    pub content: Vec<Part>,

    /// Arbitrary message metadata (e.g. `purpose: history`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Creates a message with the given role and parts.
    #[must_use]
    pub const fn new(role: Role, content: Vec<Part>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// Creates a user message with a single text part.
    #[inline]
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Creates a system message with a single text part.
    #[inline]
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Creates a model message with a single text part.
    #[inline]
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Sets a metadata entry, creating the map if needed.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Returns the value of the `purpose` metadata entry, if set.
    #[must_use]
    pub fn purpose(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("purpose"))
            .and_then(Value::as_str)
    }

    /// Concatenates the text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Part::as_text).collect()
    }
}

/// A document provided as rendering context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Ordered content parts.
    pub content: Vec<Part>,

    /// Arbitrary document metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Runtime data for rendering a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataArgument {
    /// Input variables for the template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,

    /// Relevant documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<Vec<Document>>,

    /// Previous messages in a multi-turn conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    /// Additional context values exposed to the template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl DataArgument {
    /// Creates an empty data argument.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input variables.
    #[must_use]
    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets the conversation history.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Sets the context values.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }
}
