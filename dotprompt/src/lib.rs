//! Dotprompt - executable, model-agnostic prompt documents.
//!
//! A `.prompt` file is a YAML frontmatter block followed by a Handlebars
//! template. This crate parses such documents, resolves their metadata
//! (model selection, tool definitions, Picoschema-to-JSON-Schema input and
//! output schemas, partial templates), renders the template with a fixed
//! helper set that emits sentinel markers, and parses the rendered stream
//! back into role-tagged, multi-part [`Message`]s.
//!
//! ```no_run
//! use dotprompt::{DataArgument, Dotprompt};
//! use serde_json::{json, Map, Value};
//!
//! # async fn demo() -> dotprompt::Result<()> {
//! let engine = Dotprompt::new();
//! let input: Map<String, Value> = json!({"name": "Michael"})
//!     .as_object()
//!     .cloned()
//!     .unwrap_or_default();
//! let rendered = engine
//!     .render(
//!         "---\nmodel: my-model\n---\nHello, {{name}}!",
//!         &DataArgument::new().with_input(input),
//!         None,
//!     )
//!     .await?;
//! assert_eq!(rendered.messages[0].text(), "Hello, Michael!");
//! # Ok(())
//! # }
//! ```

pub mod dotprompt;
pub mod error;
pub mod helpers;
pub mod message;
pub mod metadata;
pub mod parse;
pub mod picoschema;
pub mod resolver;
pub mod template;

pub use crate::dotprompt::{Dotprompt, DotpromptBuilder, PromptFunction};
pub use error::{Error, Result};
pub use message::{
    DataArgument, Document, MediaContent, Message, Part, Role, ToolRequest, ToolResponse,
};
pub use metadata::{
    ParsedPrompt, PromptInput, PromptMetadata, PromptOutput, RenderedPrompt, ToolDefinition,
};
pub use parse::{parse_document, to_messages};
pub use picoschema::{picoschema, PicoschemaOptions, PicoschemaParser};
pub use resolver::{
    partial_resolver_fn, schema_resolver_fn, tool_resolver_fn, PartialResolver, SchemaResolver,
    ToolResolver,
};
pub use template::{HelperFn, TemplateEngine};
