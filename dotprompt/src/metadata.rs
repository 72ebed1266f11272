//! Prompt metadata: frontmatter fields, tool definitions, and merging.
//!
//! [`PromptMetadata`] mirrors the reserved frontmatter keywords of a
//! `.prompt` document. [`ParsedPrompt`] pairs it with the template body,
//! [`RenderedPrompt`] with the final messages. Metadata layers merge
//! shallowly with a one-level deep merge for `config`, and null or empty-map
//! fields are stripped from the merged result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::Message;

/// Definition of a tool a prompt may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name (e.g. `get_weather`).
    pub name: String,

    /// Description of what the tool does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's input.
    #[serde(default)]
    pub input_schema: Map<String, Value>,

    /// JSON Schema for the tool's output, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Map<String, Value>>,
}

impl ToolDefinition {
    /// Creates a tool definition with an empty input schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Map::new(),
            output_schema: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Map<String, Value>) -> Self {
        self.input_schema = schema;
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Map<String, Value>) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Input variable configuration from the `input` frontmatter field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptInput {
    /// Default values merged under the caller's input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Map<String, Value>>,

    /// Input schema, in Picoschema or JSON Schema form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Expected output configuration from the `output` frontmatter field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOutput {
    /// Output format hint (e.g. `json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Output schema, in Picoschema or JSON Schema form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Prompt metadata resolved from frontmatter and render options.
///
/// `raw` preserves the frontmatter mapping verbatim; `ext` gathers dotted
/// extension keys by namespace (`myext.foo: 1` lands at `ext["myext"]["foo"]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptMetadata {
    /// Name of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Variant name for the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Version of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Description of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model to use, e.g. `googleai/gemini-1.5-pro`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Names of tools (registered separately) the prompt may use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,

    /// Inline tool definitions the prompt may use.
    #[serde(rename = "toolDefs", skip_serializing_if = "Option::is_none")]
    pub tool_defs: Option<Vec<ToolDefinition>>,

    /// Model configuration; not all models support all options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,

    /// Input variable configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PromptInput>,

    /// Expected output configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PromptOutput>,

    /// Arbitrary metadata for tooling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Raw frontmatter, as parsed, with no substitutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,

    /// Extension fields gathered by dotted namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
}

/// A parsed `.prompt` document: metadata plus the template body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrompt {
    /// Metadata extracted from the frontmatter.
    #[serde(flatten)]
    pub meta: PromptMetadata,

    /// The template body, trimmed when frontmatter was present.
    pub template: String,
}

/// The final result of rendering a prompt: resolved metadata plus the
/// messages to send to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    /// Resolved metadata.
    #[serde(flatten)]
    pub meta: PromptMetadata,

    /// The rendered conversation.
    pub messages: Vec<Message>,
}

/// Merges metadata layers over a base, later layers overriding earlier ones.
///
/// The merge is shallow except for `config`, which is deep-merged one level.
/// Null and empty-map fields are stripped from the result recursively.
pub(crate) fn merge_metadata(
    base: PromptMetadata,
    layers: &[Option<&PromptMetadata>],
) -> Result<PromptMetadata> {
    let mut current = to_object(&base)?;

    for layer in layers.iter().flatten() {
        let merge = to_object(layer)?;

        let mut config = current
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let layer_config = merge
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (key, value) in merge {
            current.insert(key, value);
        }

        config.extend(layer_config);
        if config.is_empty() {
            current.remove("config");
        } else {
            current.insert("config".to_owned(), Value::Object(config));
        }
    }

    // The template body never belongs in resolved metadata.
    current.remove("template");

    let cleaned = strip_undefined(Value::Object(current));
    Ok(serde_json::from_value(cleaned)?)
}

fn to_object(meta: &PromptMetadata) -> Result<Map<String, Value>> {
    match serde_json::to_value(meta)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Recursively removes null entries and empty mappings from a value tree.
pub(crate) fn strip_undefined(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                if entry.is_null() {
                    continue;
                }
                let stripped = strip_undefined(entry);
                if stripped.as_object().is_some_and(Map::is_empty) {
                    continue;
                }
                out.insert(key, stripped);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| !item.is_null())
                .map(strip_undefined)
                .collect(),
        ),
        other => other,
    }
}
