//! Thin adapter over the Handlebars template backend.
//!
//! [`TemplateEngine`] owns the handlebars registry and narrows it to the
//! capability set the render pipeline needs: compile-and-render with escaping
//! disabled, named helper registration with identity tracking, named partial
//! registration, and a template-AST walk that reports `{{> partial}}`
//! references so the resolver loop can discover them before compilation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use handlebars::template::{Parameter, Template, TemplateElement};
use handlebars::{Handlebars, HelperDef};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::helpers::{self, BUILTIN_HELPER_NAMES};

/// A user-registered template helper.
///
/// Helpers vary in arity and in whether they consume a block; the closed
/// variant set captures that at registration time and the engine adapter
/// dispatches on it. Identity (for idempotent redefinition checks) is the
/// identity of the wrapped allocation.
#[derive(Clone)]
pub enum HelperFn {
    /// Positional-argument helper producing a string.
    Simple(Arc<dyn Fn(&[Value]) -> String + Send + Sync>),
    /// Helper receiving positional and named hash arguments.
    Hash(Arc<dyn Fn(&[Value], &Map<String, Value>) -> String + Send + Sync>),
    /// Full block helper with direct access to the template backend.
    Block(Arc<dyn HelperDef + Send + Sync>),
}

impl HelperFn {
    /// Wraps a positional-argument helper.
    pub fn simple<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        Self::Simple(Arc::new(f))
    }

    /// Wraps a helper that also receives hash arguments.
    pub fn hash<F>(f: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> String + Send + Sync + 'static,
    {
        Self::Hash(Arc::new(f))
    }

    /// Wraps a full block helper.
    pub fn block(helper: impl HelperDef + Send + Sync + 'static) -> Self {
        Self::Block(Arc::new(helper))
    }

    /// Returns `true` when both values wrap the same function allocation.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Simple(a), Self::Simple(b)) => same_arc(a, b),
            (Self::Hash(a), Self::Hash(b)) => same_arc(a, b),
            (Self::Block(a), Self::Block(b)) => same_arc(a, b),
            _ => false,
        }
    }
}

fn same_arc<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl fmt::Debug for HelperFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("HelperFn::Simple"),
            Self::Hash(_) => f.write_str("HelperFn::Hash"),
            Self::Block(_) => f.write_str("HelperFn::Block"),
        }
    }
}

/// Adapts a [`HelperFn`] to the backend's helper interface.
struct HelperAdapter {
    inner: HelperFn,
}

impl HelperDef for HelperAdapter {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        reg: &'reg Handlebars<'reg>,
        ctx: &'rc handlebars::Context,
        rc: &mut handlebars::RenderContext<'reg, 'rc>,
        out: &mut dyn handlebars::Output,
    ) -> handlebars::HelperResult {
        match &self.inner {
            HelperFn::Simple(f) => {
                let params: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
                out.write(&f(&params))?;
                Ok(())
            }
            HelperFn::Hash(f) => {
                let params: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
                let mut hash = Map::new();
                for (key, value) in h.hash() {
                    hash.insert((*key).to_owned(), value.value().clone());
                }
                out.write(&f(&params, &hash))?;
                Ok(())
            }
            HelperFn::Block(helper) => helper.call(h, reg, ctx, rc, out),
        }
    }
}

/// Template engine with dotprompt's fixed configuration: raw (unescaped)
/// output, the builtin helper set, and name-keyed helper/partial registries.
pub struct TemplateEngine {
    registry: Handlebars<'static>,
    helpers: HashMap<String, HelperFn>,
    partials: HashMap<String, String>,
}

impl TemplateEngine {
    /// Creates an engine with the builtin helpers registered and HTML
    /// escaping disabled so sentinel markers pass through verbatim.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        helpers::register_builtins(&mut registry);
        Self {
            registry,
            helpers: HashMap::new(),
            partials: HashMap::new(),
        }
    }

    /// Registers a named helper.
    ///
    /// Builtin names are reserved. Re-registering a name with the same
    /// function is a no-op; with a different function it is a conflict.
    pub fn register_helper(&mut self, name: &str, helper: HelperFn) -> Result<()> {
        if BUILTIN_HELPER_NAMES.contains(&name) {
            return Err(Error::helper_conflict(name));
        }
        if let Some(existing) = self.helpers.get(name) {
            if existing.same_identity(&helper) {
                return Ok(());
            }
            return Err(Error::helper_conflict(name));
        }

        self.registry.register_helper(
            name,
            Box::new(HelperAdapter {
                inner: helper.clone(),
            }),
        );
        self.helpers.insert(name.to_owned(), helper);
        debug!(helper = name, "registered template helper");
        Ok(())
    }

    /// Registers a named partial, replacing any previous definition.
    pub fn register_partial(&mut self, name: &str, source: &str) -> Result<()> {
        self.registry.register_partial(name, source)?;
        self.partials.insert(name.to_owned(), source.to_owned());
        debug!(partial = name, "registered partial");
        Ok(())
    }

    /// Returns `true` if a partial with the given name is registered.
    #[must_use]
    pub fn has_partial(&self, name: &str) -> bool {
        self.partials.contains_key(name)
    }

    /// Compiles and renders a template against a data context.
    pub fn render(&self, template: &str, data: &Value) -> Result<String> {
        Ok(self.registry.render_template(template, data)?)
    }

    /// Parses a template and collects the names of all partials it
    /// references, in first-reference order, without duplicates.
    pub fn partial_references(template: &str) -> Result<Vec<String>> {
        let ast = Template::compile(template)?;
        let mut names = Vec::new();
        collect_partial_names(&ast, &mut names);
        // The AST reports statically named partials; a plain text scan also
        // catches name forms the node walk does not surface.
        for caps in PARTIAL_PATTERN.captures_iter(template) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().to_owned();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("helpers", &self.helpers.keys())
            .field("partials", &self.partials.keys())
            .finish_non_exhaustive()
    }
}

// Matches `{{> name}}` partial references by name.
static PARTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*>\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("partial pattern is valid")
});

fn collect_partial_names(template: &Template, names: &mut Vec<String>) {
    for element in &template.elements {
        match element {
            TemplateElement::PartialExpression(partial)
            | TemplateElement::PartialBlock(partial) => {
                if let Some(name) = parameter_name(&partial.name)
                    && !names.contains(&name)
                {
                    names.push(name);
                }
                if let Some(inner) = &partial.template {
                    collect_partial_names(inner, names);
                }
            }
            TemplateElement::HelperBlock(block) => {
                if let Some(inner) = &block.template {
                    collect_partial_names(inner, names);
                }
                if let Some(inverse) = &block.inverse {
                    collect_partial_names(inverse, names);
                }
            }
            TemplateElement::DecoratorExpression(decorator)
            | TemplateElement::DecoratorBlock(decorator) => {
                if let Some(inner) = &decorator.template {
                    collect_partial_names(inner, names);
                }
            }
            _ => {}
        }
    }
}

fn parameter_name(parameter: &Parameter) -> Option<String> {
    match parameter {
        Parameter::Name(name) => Some(name.clone()),
        Parameter::Literal(Value::String(name)) => Some(name.clone()),
        _ => None,
    }
}
