//! Late-binding resolvers for partials, tools, and named schemas.
//!
//! Resolvers are the only suspension points in the render pipeline: the
//! orchestrator invokes them during the pre-render resolution phase and may
//! fan out multiple lookups of the same stage concurrently. Implementations
//! can perform I/O; synchronous lookups wrap a plain closure with
//! [`partial_resolver_fn`], [`tool_resolver_fn`], or [`schema_resolver_fn`].
//!
//! Returning `Ok(None)` means "not found"; how that is handled depends on
//! the stage (partials stay unregistered, tools and schemas fail the
//! render). Returning `Err` aborts the render with the resolver's error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::metadata::ToolDefinition;

/// Resolves a partial name to its template source.
#[async_trait]
pub trait PartialResolver: Send + Sync {
    /// Looks up the source of the named partial.
    async fn resolve_partial(&self, name: &str) -> Result<Option<String>>;
}

/// Resolves a tool name to its definition.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    /// Looks up the definition of the named tool.
    async fn resolve_tool(&self, name: &str) -> Result<Option<ToolDefinition>>;
}

/// Resolves a schema name to a JSON Schema.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    /// Looks up the JSON Schema registered under the given name.
    async fn resolve_schema(&self, name: &str) -> Result<Option<Value>>;
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> PartialResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn resolve_partial(&self, name: &str) -> Result<Option<String>> {
        Ok((self.0)(name))
    }
}

#[async_trait]
impl<F> ToolResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<ToolDefinition> + Send + Sync,
{
    async fn resolve_tool(&self, name: &str) -> Result<Option<ToolDefinition>> {
        Ok((self.0)(name))
    }
}

#[async_trait]
impl<F> SchemaResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    async fn resolve_schema(&self, name: &str) -> Result<Option<Value>> {
        Ok((self.0)(name))
    }
}

/// Wraps a synchronous lookup closure as a [`PartialResolver`].
pub fn partial_resolver_fn<F>(f: F) -> Arc<dyn PartialResolver>
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(FnResolver(f))
}

/// Wraps a synchronous lookup closure as a [`ToolResolver`].
pub fn tool_resolver_fn<F>(f: F) -> Arc<dyn ToolResolver>
where
    F: Fn(&str) -> Option<ToolDefinition> + Send + Sync + 'static,
{
    Arc::new(FnResolver(f))
}

/// Wraps a synchronous lookup closure as a [`SchemaResolver`].
pub fn schema_resolver_fn<F>(f: F) -> Arc<dyn SchemaResolver>
where
    F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
{
    Arc::new(FnResolver(f))
}
