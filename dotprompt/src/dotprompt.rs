//! The dotprompt engine: registries, metadata resolution, and rendering.
//!
//! [`Dotprompt`] owns the mutable per-engine state: the template engine with
//! its helper and partial registries, plus tool, schema, and model-config
//! registries. Rendering is a fixed pipeline: parse, resolve partials to a
//! fixpoint, merge metadata layers, resolve tools, transform Picoschema
//! schemas, render the template, and parse the rendered stream into
//! messages.
//!
//! Registries are interior-mutable and writable through `define_*`;
//! rendering treats them as read-only once partial resolution begins, so
//! concurrent renders against a frozen registry are safe to share.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::DataArgument;
use crate::metadata::{
    merge_metadata, ParsedPrompt, PromptMetadata, RenderedPrompt, ToolDefinition,
};
use crate::parse::{parse_document, to_messages};
use crate::picoschema::{picoschema, PicoschemaOptions};
use crate::resolver::{PartialResolver, SchemaResolver, ToolResolver};
use crate::template::{HelperFn, TemplateEngine};

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The dotprompt engine.
///
/// Holds the template backend and the name-keyed registries shared by all
/// renders on this instance. Construct with [`Dotprompt::new`] for an empty
/// engine or [`Dotprompt::builder`] to seed registries and resolvers.
pub struct Dotprompt {
    engine: RwLock<TemplateEngine>,
    default_model: Option<String>,
    model_configs: HashMap<String, Map<String, Value>>,
    tools: RwLock<HashMap<String, ToolDefinition>>,
    schemas: RwLock<HashMap<String, Value>>,
    tool_resolver: Option<Arc<dyn ToolResolver>>,
    schema_resolver: Option<Arc<dyn SchemaResolver>>,
    partial_resolver: Option<Arc<dyn PartialResolver>>,
}

impl Default for Dotprompt {
    fn default() -> Self {
        Self {
            engine: RwLock::new(TemplateEngine::new()),
            default_model: None,
            model_configs: HashMap::new(),
            tools: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            tool_resolver: None,
            schema_resolver: None,
            partial_resolver: None,
        }
    }
}

impl Dotprompt {
    /// Creates an engine with empty registries and no resolvers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for configuring an engine.
    #[must_use]
    pub fn builder() -> DotpromptBuilder {
        DotpromptBuilder::default()
    }

    /// Registers a named helper.
    ///
    /// Redefinition with the same function is a no-op; with a different
    /// function it fails with [`Error::HelperConflict`].
    pub fn define_helper(&self, name: &str, helper: HelperFn) -> Result<()> {
        write_lock(&self.engine).register_helper(name, helper)
    }

    /// Registers a named partial template, replacing any previous source.
    pub fn define_partial(&self, name: &str, source: &str) -> Result<()> {
        write_lock(&self.engine).register_partial(name, source)
    }

    /// Registers a tool definition under its name.
    pub fn define_tool(&self, definition: ToolDefinition) {
        debug!(tool = %definition.name, "registered tool");
        write_lock(&self.tools).insert(definition.name.clone(), definition);
    }

    /// Registers a named schema for `schema_resolver`-style lookups from
    /// Picoschema.
    ///
    /// An empty name or a null schema is a precondition violation.
    pub fn define_schema(&self, name: &str, schema: Value) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_schema("schema name must not be empty"));
        }
        if schema.is_null() {
            return Err(Error::invalid_schema(format!(
                "schema '{name}' must not be null"
            )));
        }
        debug!(schema = name, "registered schema");
        write_lock(&self.schemas).insert(name.to_owned(), schema);
        Ok(())
    }

    /// Parses a `.prompt` document into metadata and template.
    #[must_use]
    pub fn parse(&self, source: &str) -> ParsedPrompt {
        parse_document(source)
    }

    /// Renders a prompt document with the given data.
    pub async fn render(
        &self,
        source: &str,
        data: &DataArgument,
        options: Option<&PromptMetadata>,
    ) -> Result<RenderedPrompt> {
        let prompt = self.compile(source).await?;
        prompt.render(data, options).await
    }

    /// Compiles a prompt document into a reusable render function.
    ///
    /// Partials referenced by the template are resolved and registered
    /// transitively before this returns.
    pub async fn compile(&self, source: &str) -> Result<PromptFunction<'_>> {
        let prompt = self.parse(source);
        self.resolve_partials(&prompt.template).await?;
        Ok(PromptFunction {
            prompt,
            dotprompt: self,
        })
    }

    /// Resolves a prompt's metadata without rendering its body: merges the
    /// model-config, frontmatter, and options layers, resolves tool names,
    /// and transforms Picoschema schemas.
    pub async fn render_metadata(
        &self,
        source: &str,
        options: Option<&PromptMetadata>,
    ) -> Result<PromptMetadata> {
        let prompt = self.parse(source);
        self.resolve_metadata(&prompt, options).await
    }

    async fn resolve_metadata(
        &self,
        prompt: &ParsedPrompt,
        options: Option<&PromptMetadata>,
    ) -> Result<PromptMetadata> {
        let selected_model = options
            .and_then(|o| o.model.as_deref())
            .or(prompt.meta.model.as_deref())
            .or(self.default_model.as_deref());

        let mut base = PromptMetadata::default();
        if let Some(model) = selected_model {
            if prompt.meta.model.is_none() && options.and_then(|o| o.model.as_deref()).is_none() {
                base.model = Some(model.to_owned());
            }
            if let Some(config) = self.model_configs.get(model) {
                base.config = Some(config.clone());
            }
        }

        let mut merged = merge_metadata(base, &[Some(&prompt.meta), options])?;
        self.resolve_tools(&mut merged).await?;
        self.transform_schemas(&mut merged).await?;
        Ok(merged)
    }

    /// Moves registered tool names into `toolDefs`, resolves the rest
    /// through the tool resolver, and leaves unresolvable names in `tools`.
    async fn resolve_tools(&self, meta: &mut PromptMetadata) -> Result<()> {
        let Some(names) = meta.tools.take() else {
            return Ok(());
        };

        let mut tool_defs = meta.tool_defs.take().unwrap_or_default();
        let mut unregistered = Vec::new();
        let mut to_resolve = Vec::new();
        {
            let tools = read_lock(&self.tools);
            for name in names {
                if let Some(definition) = tools.get(&name) {
                    tool_defs.push(definition.clone());
                } else if self.tool_resolver.is_some() {
                    to_resolve.push(name);
                } else {
                    unregistered.push(name);
                }
            }
        }

        if let Some(resolver) = &self.tool_resolver
            && !to_resolve.is_empty()
        {
            let resolved = try_join_all(to_resolve.iter().map(|name| async move {
                resolver
                    .resolve_tool(name)
                    .await?
                    .ok_or_else(|| Error::tool_not_found(name.clone()))
            }))
            .await?;
            tool_defs.extend(resolved);
        }

        meta.tools = Some(unregistered);
        meta.tool_defs = if tool_defs.is_empty() {
            None
        } else {
            Some(tool_defs)
        };
        Ok(())
    }

    /// Transforms `input.schema` and `output.schema` through Picoschema,
    /// resolving named references against the schema registry first and the
    /// user resolver second.
    async fn transform_schemas(&self, meta: &mut PromptMetadata) -> Result<()> {
        let input_schema = meta.input.as_ref().and_then(|i| i.schema.clone());
        let output_schema = meta.output.as_ref().and_then(|o| o.schema.clone());
        if input_schema.is_none() && output_schema.is_none() {
            return Ok(());
        }

        let resolver = RegistrySchemaResolver { engine: self };
        let (new_input, new_output) = futures::join!(
            async {
                match &input_schema {
                    Some(schema) => {
                        picoschema(
                            Some(schema),
                            PicoschemaOptions {
                                schema_resolver: Some(&resolver),
                            },
                        )
                        .await
                    }
                    None => Ok(None),
                }
            },
            async {
                match &output_schema {
                    Some(schema) => {
                        picoschema(
                            Some(schema),
                            PicoschemaOptions {
                                schema_resolver: Some(&resolver),
                            },
                        )
                        .await
                    }
                    None => Ok(None),
                }
            }
        );

        if input_schema.is_some()
            && let Some(input) = meta.input.as_mut()
        {
            input.schema = new_input?;
        }
        if output_schema.is_some()
            && let Some(output) = meta.output.as_mut()
        {
            output.schema = new_output?;
        }
        Ok(())
    }

    /// Discovers and registers partials referenced by a template until no
    /// new references remain. Names found in one pass are resolved
    /// concurrently; a `None` from the resolver leaves the partial
    /// unregistered and the render surfaces the backend's unknown-partial
    /// error.
    async fn resolve_partials(&self, template: &str) -> Result<()> {
        let Some(resolver) = &self.partial_resolver else {
            return Ok(());
        };

        let mut queue = vec![template.to_owned()];
        while let Some(source) = queue.pop() {
            let referenced = TemplateEngine::partial_references(&source)?;
            let unregistered: Vec<String> = {
                let engine = read_lock(&self.engine);
                referenced
                    .into_iter()
                    .filter(|name| !engine.has_partial(name))
                    .collect()
            };
            if unregistered.is_empty() {
                continue;
            }

            let resolved = try_join_all(unregistered.iter().map(|name| async move {
                Ok::<_, Error>((name.as_str(), resolver.resolve_partial(name).await?))
            }))
            .await?;

            let mut engine = write_lock(&self.engine);
            for (name, body) in resolved {
                if let Some(body) = body {
                    debug!(partial = name, "resolved partial");
                    engine.register_partial(name, &body)?;
                    queue.push(body);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dotprompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dotprompt")
            .field("default_model", &self.default_model)
            .field("model_configs", &self.model_configs.keys())
            .finish_non_exhaustive()
    }
}

/// Schema resolver that consults the engine's schema registry before
/// falling back to the user-provided resolver.
struct RegistrySchemaResolver<'a> {
    engine: &'a Dotprompt,
}

#[async_trait]
impl SchemaResolver for RegistrySchemaResolver<'_> {
    async fn resolve_schema(&self, name: &str) -> Result<Option<Value>> {
        {
            let schemas = read_lock(&self.engine.schemas);
            if let Some(schema) = schemas.get(name) {
                return Ok(Some(schema.clone()));
            }
        }
        match &self.engine.schema_resolver {
            Some(resolver) => resolver.resolve_schema(name).await,
            None => Ok(None),
        }
    }
}

/// A compiled prompt: parsed once, renderable many times against different
/// data.
#[derive(Debug)]
pub struct PromptFunction<'a> {
    /// The parsed prompt this function renders.
    pub prompt: ParsedPrompt,
    dotprompt: &'a Dotprompt,
}

impl PromptFunction<'_> {
    /// Renders the compiled prompt with the given data.
    pub async fn render(
        &self,
        data: &DataArgument,
        options: Option<&PromptMetadata>,
    ) -> Result<RenderedPrompt> {
        let mut merged = self
            .dotprompt
            .resolve_metadata(&self.prompt, options)
            .await?;
        // Input configuration is meaningless once the template is rendered.
        merged.input = None;

        let context = build_context(&merged, data, options)?;
        let rendered = {
            let engine = read_lock(&self.dotprompt.engine);
            engine.render(&self.prompt.template, &Value::Object(context))?
        };
        debug!(len = rendered.len(), "rendered template");

        let messages = to_messages(&rendered, Some(data))?;
        Ok(RenderedPrompt {
            meta: merged,
            messages,
        })
    }
}

/// Assembles the render context: default input values from the options
/// overlaid with the caller's input at the root, plus a `metadata` bag
/// carrying the resolved prompt metadata, documents, history, and context
/// values. Caller input shadows the bag on key collisions.
fn build_context(
    merged: &PromptMetadata,
    data: &DataArgument,
    options: Option<&PromptMetadata>,
) -> Result<Map<String, Value>> {
    let mut bag = Map::new();
    bag.insert("prompt".to_owned(), serde_json::to_value(merged)?);
    if let Some(docs) = &data.docs {
        bag.insert("docs".to_owned(), serde_json::to_value(docs)?);
    }
    if let Some(messages) = &data.messages {
        bag.insert("messages".to_owned(), serde_json::to_value(messages)?);
    }
    if let Some(context) = &data.context {
        bag.insert("context".to_owned(), Value::Object(context.clone()));
    }

    let mut context = Map::new();
    context.insert("metadata".to_owned(), Value::Object(bag));
    if let Some(defaults) = options
        .and_then(|o| o.input.as_ref())
        .and_then(|i| i.default.as_ref())
    {
        context.extend(defaults.clone());
    }
    if let Some(input) = &data.input {
        context.extend(input.clone());
    }
    Ok(context)
}

/// Builder for a configured [`Dotprompt`] engine.
#[derive(Default)]
pub struct DotpromptBuilder {
    default_model: Option<String>,
    model_configs: HashMap<String, Map<String, Value>>,
    helpers: Vec<(String, HelperFn)>,
    partials: Vec<(String, String)>,
    tools: Vec<ToolDefinition>,
    schemas: Vec<(String, Value)>,
    tool_resolver: Option<Arc<dyn ToolResolver>>,
    schema_resolver: Option<Arc<dyn SchemaResolver>>,
    partial_resolver: Option<Arc<dyn PartialResolver>>,
}

impl DotpromptBuilder {
    /// Sets the fallback model used when neither the prompt nor the render
    /// options name one.
    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Assigns default configuration for a model name.
    #[must_use]
    pub fn model_config(mut self, model: impl Into<String>, config: Map<String, Value>) -> Self {
        self.model_configs.insert(model.into(), config);
        self
    }

    /// Pre-registers a helper.
    #[must_use]
    pub fn helper(mut self, name: impl Into<String>, helper: HelperFn) -> Self {
        self.helpers.push((name.into(), helper));
        self
    }

    /// Pre-registers a partial.
    #[must_use]
    pub fn partial(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.partials.push((name.into(), source.into()));
        self
    }

    /// Pre-registers a tool definition.
    #[must_use]
    pub fn tool(mut self, definition: ToolDefinition) -> Self {
        self.tools.push(definition);
        self
    }

    /// Pre-registers a named schema.
    #[must_use]
    pub fn schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schemas.push((name.into(), schema));
        self
    }

    /// Sets the tool resolver.
    #[must_use]
    pub fn tool_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.tool_resolver = Some(resolver);
        self
    }

    /// Sets the schema resolver.
    #[must_use]
    pub fn schema_resolver(mut self, resolver: Arc<dyn SchemaResolver>) -> Self {
        self.schema_resolver = Some(resolver);
        self
    }

    /// Sets the partial resolver.
    #[must_use]
    pub fn partial_resolver(mut self, resolver: Arc<dyn PartialResolver>) -> Self {
        self.partial_resolver = Some(resolver);
        self
    }

    /// Builds the engine, registering the seeded helpers, partials, tools,
    /// and schemas.
    pub fn build(self) -> Result<Dotprompt> {
        let dotprompt = Dotprompt {
            engine: RwLock::new(TemplateEngine::new()),
            default_model: self.default_model,
            model_configs: self.model_configs,
            tools: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            tool_resolver: self.tool_resolver,
            schema_resolver: self.schema_resolver,
            partial_resolver: self.partial_resolver,
        };

        for (name, helper) in self.helpers {
            dotprompt.define_helper(&name, helper)?;
        }
        for (name, source) in self.partials {
            dotprompt.define_partial(&name, &source)?;
        }
        for definition in self.tools {
            dotprompt.define_tool(definition);
        }
        for (name, schema) in self.schemas {
            dotprompt.define_schema(&name, schema)?;
        }
        Ok(dotprompt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{Message, Part, Role};
    use crate::resolver::{partial_resolver_fn, schema_resolver_fn, tool_resolver_fn};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn input(value: Value) -> DataArgument {
        DataArgument::new().with_input(object(value))
    }

    mod rendering {
        use super::*;

        #[tokio::test]
        async fn substitutes_variables() {
            let dotprompt = Dotprompt::new();
            let rendered = dotprompt
                .render(
                    "Hello, {{name}}!\n",
                    &input(json!({"name": "Michael"})),
                    None,
                )
                .await
                .unwrap();

            assert_eq!(
                rendered.messages,
                vec![Message::new(Role::User, vec![Part::text("Hello, Michael!\n")])]
            );
        }

        #[tokio::test]
        async fn splits_roles_from_helpers() {
            let dotprompt = Dotprompt::new();
            let rendered = dotprompt
                .render(
                    "{{role \"system\"}}Instructions\n{{role \"user\"}}Query",
                    &DataArgument::new(),
                    None,
                )
                .await
                .unwrap();

            assert_eq!(rendered.messages.len(), 2);
            assert_eq!(rendered.messages[0].role, Role::System);
            assert_eq!(rendered.messages[0].text(), "Instructions\n");
            assert_eq!(rendered.messages[1].role, Role::User);
            assert_eq!(rendered.messages[1].text(), "Query");
        }

        #[tokio::test]
        async fn inserts_history_before_trailing_user_message() {
            let dotprompt = Dotprompt::new();
            let history = vec![Message::model("H").with_metadata("purpose", json!("history"))];
            let data = DataArgument::new()
                .with_input(object(json!({})))
                .with_messages(history);

            let rendered = dotprompt
                .render(
                    "{{role \"system\"}}S{{role \"user\"}}U",
                    &data,
                    None,
                )
                .await
                .unwrap();

            let roles: Vec<&Role> = rendered.messages.iter().map(|m| &m.role).collect();
            assert_eq!(roles, vec![&Role::System, &Role::Model, &Role::User]);
            assert_eq!(rendered.messages[1].purpose(), Some("history"));
        }

        #[tokio::test]
        async fn media_helper_produces_media_part() {
            let dotprompt = Dotprompt::new();
            let rendered = dotprompt
                .render(
                    "{{media url=photo contentType=\"image/jpeg\"}}",
                    &input(json!({"photo": "https://e.com/a.jpg"})),
                    None,
                )
                .await
                .unwrap();

            assert_eq!(
                rendered.messages[0].content,
                vec![Part::media_with_type("https://e.com/a.jpg", "image/jpeg")]
            );
        }

        #[tokio::test]
        async fn invalid_marker_is_preserved_as_text() {
            let dotprompt = Dotprompt::new();
            let rendered = dotprompt
                .render("<<<dotprompt:ROLE:user>>>", &DataArgument::new(), None)
                .await
                .unwrap();

            assert_eq!(rendered.messages.len(), 1);
            assert!(rendered.messages[0].role.is_user());
            assert_eq!(rendered.messages[0].text(), "<<<dotprompt:ROLE:user>>>");
        }

        #[tokio::test]
        async fn rendering_twice_yields_equal_results() {
            let dotprompt = Dotprompt::new();
            let source = "---\nmodel: m\n---\n{{role \"user\"}}Hello {{name}}";
            let data = input(json!({"name": "x"}));

            let first = dotprompt.render(source, &data, None).await.unwrap();
            let second = dotprompt.render(source, &data, None).await.unwrap();
            assert_eq!(first, second);
        }

        #[tokio::test]
        async fn compile_returns_reusable_function() {
            let dotprompt = Dotprompt::new();
            let prompt = dotprompt.compile("Hi {{who}}").await.unwrap();
            assert_eq!(prompt.prompt.template, "Hi {{who}}");

            let first = prompt
                .render(&input(json!({"who": "a"})), None)
                .await
                .unwrap();
            let second = prompt
                .render(&input(json!({"who": "b"})), None)
                .await
                .unwrap();
            assert_eq!(first.messages[0].text(), "Hi a");
            assert_eq!(second.messages[0].text(), "Hi b");
        }

        #[tokio::test]
        async fn default_input_from_options_fills_missing_values() {
            let dotprompt = Dotprompt::new();
            let options = PromptMetadata {
                input: Some(crate::metadata::PromptInput {
                    default: Some(object(json!({"name": "World", "greeting": "Hello"}))),
                    schema: None,
                }),
                ..Default::default()
            };

            let rendered = dotprompt
                .render(
                    "{{greeting}}, {{name}}!",
                    &input(json!({"name": "Michael"})),
                    Some(&options),
                )
                .await
                .unwrap();

            assert_eq!(rendered.messages[0].text(), "Hello, Michael!");
        }

        #[tokio::test]
        async fn custom_helper_participates_in_render() {
            let dotprompt = Dotprompt::new();
            dotprompt
                .define_helper(
                    "upper",
                    HelperFn::simple(|params| {
                        params
                            .first()
                            .and_then(Value::as_str)
                            .map(str::to_uppercase)
                            .unwrap_or_default()
                    }),
                )
                .unwrap();

            let rendered = dotprompt
                .render("{{upper name}}", &input(json!({"name": "ada"})), None)
                .await
                .unwrap();
            assert_eq!(rendered.messages[0].text(), "ADA");
        }
    }

    mod metadata_resolution {
        use super::*;

        #[tokio::test]
        async fn frontmatter_model_wins_over_default() {
            let dotprompt = Dotprompt::builder()
                .default_model("fallback-model")
                .build()
                .unwrap();
            let meta = dotprompt
                .render_metadata("---\nmodel: prompt-model\n---\nBody", None)
                .await
                .unwrap();
            assert_eq!(meta.model.as_deref(), Some("prompt-model"));
        }

        #[tokio::test]
        async fn options_model_wins_over_frontmatter() {
            let dotprompt = Dotprompt::new();
            let options = PromptMetadata {
                model: Some("options-model".to_owned()),
                ..Default::default()
            };
            let meta = dotprompt
                .render_metadata("---\nmodel: prompt-model\n---\nBody", Some(&options))
                .await
                .unwrap();
            assert_eq!(meta.model.as_deref(), Some("options-model"));
        }

        #[tokio::test]
        async fn default_model_applies_when_unspecified() {
            let dotprompt = Dotprompt::builder()
                .default_model("fallback-model")
                .build()
                .unwrap();
            let meta = dotprompt.render_metadata("Body", None).await.unwrap();
            assert_eq!(meta.model.as_deref(), Some("fallback-model"));
        }

        #[tokio::test]
        async fn model_config_seeds_the_config_layer() {
            let dotprompt = Dotprompt::builder()
                .model_config("m", object(json!({"temperature": 0.3, "topK": 10})))
                .build()
                .unwrap();
            let meta = dotprompt
                .render_metadata("---\nmodel: m\nconfig:\n  temperature: 0.9\n---\nBody", None)
                .await
                .unwrap();

            let config = meta.config.unwrap();
            assert_eq!(config.get("temperature"), Some(&json!(0.9)));
            assert_eq!(config.get("topK"), Some(&json!(10)));
        }

        #[tokio::test]
        async fn input_schema_is_transformed() {
            let dotprompt = Dotprompt::new();
            let meta = dotprompt
                .render_metadata(
                    "---\ninput:\n  schema:\n    name: string\n---\nBody",
                    None,
                )
                .await
                .unwrap();

            let schema = meta.input.unwrap().schema.unwrap();
            assert_eq!(schema["type"], json!("object"));
            assert_eq!(schema["properties"]["name"], json!({"type": "string"}));
            assert_eq!(schema["required"], json!(["name"]));
        }

        #[tokio::test]
        async fn output_schema_resolves_named_reference_from_registry() {
            let dotprompt = Dotprompt::new();
            dotprompt
                .define_schema(
                    "Person",
                    json!({"type": "object", "properties": {"name": {"type": "string"}}}),
                )
                .unwrap();

            let meta = dotprompt
                .render_metadata("---\noutput:\n  schema: Person\n---\nBody", None)
                .await
                .unwrap();
            let schema = meta.output.unwrap().schema.unwrap();
            assert_eq!(schema["properties"]["name"], json!({"type": "string"}));
        }

        #[tokio::test]
        async fn schema_resolver_is_fallback_after_registry() {
            let dotprompt = Dotprompt::builder()
                .schema_resolver(schema_resolver_fn(|name| {
                    (name == "External").then(|| json!({"type": "string"}))
                }))
                .build()
                .unwrap();

            let meta = dotprompt
                .render_metadata("---\ninput:\n  schema: External\n---\nBody", None)
                .await
                .unwrap();
            assert_eq!(
                meta.input.unwrap().schema.unwrap(),
                json!({"type": "string"})
            );
        }

        #[tokio::test]
        async fn unknown_named_schema_fails() {
            let dotprompt = Dotprompt::new();
            let err = dotprompt
                .render_metadata("---\ninput:\n  schema: Missing\n---\nBody", None)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::SchemaNotFound(_)));
        }
    }

    mod tools {
        use super::*;

        #[tokio::test]
        async fn registered_tools_move_to_tool_defs() {
            let dotprompt = Dotprompt::new();
            dotprompt.define_tool(ToolDefinition::new("weather").with_description("forecasts"));

            let meta = dotprompt
                .render_metadata("---\ntools:\n  - weather\n---\nBody", None)
                .await
                .unwrap();

            assert_eq!(meta.tools, Some(Vec::new()));
            let defs = meta.tool_defs.unwrap();
            assert_eq!(defs.len(), 1);
            assert_eq!(defs[0].name, "weather");
        }

        #[tokio::test]
        async fn unknown_tools_stay_unresolved_without_resolver() {
            let dotprompt = Dotprompt::new();
            let meta = dotprompt
                .render_metadata("---\ntools:\n  - mystery\n---\nBody", None)
                .await
                .unwrap();
            assert_eq!(meta.tools, Some(vec!["mystery".to_owned()]));
            assert_eq!(meta.tool_defs, None);
        }

        #[tokio::test]
        async fn resolver_supplies_missing_tools() {
            let dotprompt = Dotprompt::builder()
                .tool_resolver(tool_resolver_fn(|name| {
                    (name == "search").then(|| ToolDefinition::new("search"))
                }))
                .build()
                .unwrap();

            let meta = dotprompt
                .render_metadata("---\ntools:\n  - search\n---\nBody", None)
                .await
                .unwrap();
            assert_eq!(meta.tool_defs.unwrap()[0].name, "search");
        }

        #[tokio::test]
        async fn resolver_returning_none_fails_the_render() {
            let dotprompt = Dotprompt::builder()
                .tool_resolver(tool_resolver_fn(|_| None))
                .build()
                .unwrap();

            let err = dotprompt
                .render_metadata("---\ntools:\n  - ghost\n---\nBody", None)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ToolNotFound(_)));
        }

        #[tokio::test]
        async fn cancelled_tool_resolver_surfaces_unchanged() {
            struct Cancelling;

            #[async_trait]
            impl ToolResolver for Cancelling {
                async fn resolve_tool(&self, _name: &str) -> Result<Option<ToolDefinition>> {
                    Err(Error::Cancelled)
                }
            }

            let dotprompt = Dotprompt::builder()
                .tool_resolver(Arc::new(Cancelling))
                .build()
                .unwrap();

            let err = dotprompt
                .render(
                    "---\ntools:\n  - remote\n---\nBody",
                    &DataArgument::new(),
                    None,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Cancelled));
        }
    }

    mod partials {
        use super::*;

        #[tokio::test]
        async fn statically_registered_partial_renders() {
            let dotprompt = Dotprompt::new();
            dotprompt
                .define_partial("greeting", "Hello, {{name}}!")
                .unwrap();

            let rendered = dotprompt
                .render("{{> greeting}}", &input(json!({"name": "World"})), None)
                .await
                .unwrap();
            assert_eq!(rendered.messages[0].text(), "Hello, World!");
        }

        #[tokio::test]
        async fn resolver_registers_partials_transitively() {
            let dotprompt = Dotprompt::builder()
                .partial_resolver(partial_resolver_fn(|name| match name {
                    "outer" => Some("outer({{> inner}})".to_owned()),
                    "inner" => Some("inner".to_owned()),
                    _ => None,
                }))
                .build()
                .unwrap();

            let rendered = dotprompt
                .render("{{> outer}}", &DataArgument::new(), None)
                .await
                .unwrap();
            assert_eq!(rendered.messages[0].text(), "outer(inner)");
        }

        #[tokio::test]
        async fn unresolved_partial_fails_at_render_time() {
            let dotprompt = Dotprompt::builder()
                .partial_resolver(partial_resolver_fn(|_| None))
                .build()
                .unwrap();

            let err = dotprompt
                .render("{{> missing}}", &DataArgument::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Render(_)));
        }

        #[tokio::test]
        async fn cancelled_partial_resolver_aborts_compilation() {
            struct Cancelling;

            #[async_trait]
            impl PartialResolver for Cancelling {
                async fn resolve_partial(&self, _name: &str) -> Result<Option<String>> {
                    Err(Error::Cancelled)
                }
            }

            let dotprompt = Dotprompt::builder()
                .partial_resolver(Arc::new(Cancelling))
                .build()
                .unwrap();

            let err = dotprompt.compile("{{> remote}}").await.unwrap_err();
            assert!(matches!(err, Error::Cancelled));
        }
    }

    mod registries {
        use super::*;

        #[tokio::test]
        async fn define_schema_rejects_empty_name() {
            let dotprompt = Dotprompt::new();
            let err = dotprompt.define_schema("", json!({})).unwrap_err();
            assert!(matches!(err, Error::InvalidSchema(_)));
        }

        #[tokio::test]
        async fn define_schema_rejects_null_schema() {
            let dotprompt = Dotprompt::new();
            let err = dotprompt.define_schema("x", Value::Null).unwrap_err();
            assert!(matches!(err, Error::InvalidSchema(_)));
        }

        #[tokio::test]
        async fn helper_conflict_through_engine() {
            let dotprompt = Dotprompt::new();
            dotprompt
                .define_helper("h", HelperFn::simple(|_| "a".to_owned()))
                .unwrap();
            let err = dotprompt
                .define_helper("h", HelperFn::simple(|_| "b".to_owned()))
                .unwrap_err();
            assert!(matches!(err, Error::HelperConflict(_)));
        }
    }

    mod context_building {
        use super::*;

        #[tokio::test]
        async fn metadata_bag_exposes_prompt_and_context() {
            let dotprompt = Dotprompt::new();
            let data = DataArgument::new()
                .with_input(object(json!({})))
                .with_context(object(json!({"state": {"city": "Kyoto"}})));

            let rendered = dotprompt
                .render(
                    "---\nname: test-prompt\n---\n{{metadata.prompt.name}}/{{metadata.context.state.city}}",
                    &data,
                    None,
                )
                .await
                .unwrap();
            assert_eq!(rendered.messages[0].text(), "test-prompt/Kyoto");
        }

        #[tokio::test]
        async fn caller_input_shadows_metadata_bag() {
            let dotprompt = Dotprompt::new();
            let rendered = dotprompt
                .render(
                    "{{metadata}}",
                    &input(json!({"metadata": "mine"})),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(rendered.messages[0].text(), "mine");
        }
    }
}
