//! Builtin template helpers.
//!
//! Seven helpers form the baseline registry. Four of them emit sentinel
//! markers consumed by the post-render parser:
//!
//! | Helper         | Emits                                            |
//! |----------------|--------------------------------------------------|
//! | `role`         | `<<<dotprompt:role:NAME>>>`                      |
//! | `history`      | `<<<dotprompt:history>>>`                        |
//! | `media`        | `<<<dotprompt:media:url URL [CONTENT_TYPE]>>>`   |
//! | `section`      | `<<<dotprompt:section NAME>>>`                   |
//! | `json`         | JSON-serialized value, optionally pretty-printed |
//! | `ifEquals`     | block content when both arguments are equal      |
//! | `unlessEquals` | block content when the arguments differ          |
//!
//! Markers must survive the render verbatim, so the engine registers these
//! on a registry whose escape function is a no-op.

use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
    RenderErrorReason, Renderable,
};
use serde::Serialize;
use serde_json::Value;

use crate::parse::{HISTORY_MARKER_PREFIX, ROLE_MARKER_PREFIX, SECTION_MARKER_PREFIX};

/// Names of the builtin helpers, reserved on every engine instance.
pub const BUILTIN_HELPER_NAMES: &[&str] = &[
    "history",
    "ifEquals",
    "json",
    "media",
    "role",
    "section",
    "unlessEquals",
];

/// Registers the builtin helper set on a handlebars registry.
pub(crate) fn register_builtins(registry: &mut Handlebars<'static>) {
    registry.register_helper("role", Box::new(RoleHelper));
    registry.register_helper("history", Box::new(HistoryHelper));
    registry.register_helper("media", Box::new(MediaHelper));
    registry.register_helper("section", Box::new(SectionHelper));
    registry.register_helper("json", Box::new(JsonHelper));
    registry.register_helper("ifEquals", Box::new(IfEqualsHelper));
    registry.register_helper("unlessEquals", Box::new(UnlessEqualsHelper));
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `{{role "NAME"}}` emits a role marker.
#[derive(Clone, Copy, Debug)]
pub struct RoleHelper;

impl HelperDef for RoleHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _reg: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let Some(param) = h.param(0) else {
            return Ok(());
        };
        let name = value_to_plain_string(param.value());
        out.write(&format!("{ROLE_MARKER_PREFIX}{name}>>>"))?;
        Ok(())
    }
}

/// `{{history}}` emits a history marker.
#[derive(Clone, Copy, Debug)]
pub struct HistoryHelper;

impl HelperDef for HistoryHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _h: &Helper<'rc>,
        _reg: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        out.write(&format!("{HISTORY_MARKER_PREFIX}>>>"))?;
        Ok(())
    }
}

/// `{{media url=URL contentType=TYPE}}` emits a media marker. The
/// `contentType` hash argument is optional; a missing `url` renders nothing.
#[derive(Clone, Copy, Debug)]
pub struct MediaHelper;

impl HelperDef for MediaHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _reg: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let url = h
            .hash_get("url")
            .map(|v| value_to_plain_string(v.value()))
            .unwrap_or_default();
        if url.is_empty() {
            return Ok(());
        }

        let content_type = h
            .hash_get("contentType")
            .map(|v| value_to_plain_string(v.value()))
            .unwrap_or_default();
        if content_type.is_empty() {
            out.write(&format!("<<<dotprompt:media:url {url}>>>"))?;
        } else {
            out.write(&format!("<<<dotprompt:media:url {url} {content_type}>>>"))?;
        }
        Ok(())
    }
}

/// `{{section NAME}}` emits a section marker.
#[derive(Clone, Copy, Debug)]
pub struct SectionHelper;

impl HelperDef for SectionHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _reg: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let Some(param) = h.param(0) else {
            return Ok(());
        };
        let name = value_to_plain_string(param.value());
        out.write(&format!("{SECTION_MARKER_PREFIX} {name}>>>"))?;
        Ok(())
    }
}

/// `{{json value indent=N}}` serializes a value to JSON; `indent` selects
/// pretty printing with that many spaces per level.
#[derive(Clone, Copy, Debug)]
pub struct JsonHelper;

impl HelperDef for JsonHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _reg: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let Some(param) = h.param(0) else {
            out.write("")?;
            return Ok(());
        };
        let value = param.value();

        let indent = h.hash_get("indent").map(|v| match v.value() {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        });

        let serialized = match indent {
            Some(indent) if indent > 0 => serialize_pretty(value, indent as usize),
            _ => serde_json::to_string(value).ok(),
        };
        out.write(&serialized.unwrap_or_else(|| "{}".to_owned()))?;
        Ok(())
    }
}

fn serialize_pretty(value: &Value, indent: usize) -> Option<String> {
    let indent_bytes = vec![b' '; indent];
    let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).ok()?;
    String::from_utf8(buf).ok()
}

/// Shared body of the two equality block helpers: compares the first two
/// arguments and renders the main block or the inverse block depending on
/// whether the comparison matched the wanted polarity.
fn render_equality_block<'reg: 'rc, 'rc>(
    h: &Helper<'rc>,
    reg: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
    want_equal: bool,
) -> HelperResult {
    let (Some(first), Some(second)) = (h.param(0), h.param(1)) else {
        return Err(RenderErrorReason::Other(format!(
            "'{}' expects two arguments to compare",
            h.name()
        ))
        .into());
    };

    let branch = if (first.value() == second.value()) == want_equal {
        h.template()
    } else {
        h.inverse()
    };
    match branch {
        Some(template) => template.render(reg, ctx, rc, out),
        None => Ok(()),
    }
}

/// `{{#ifEquals a b}}...{{else}}...{{/ifEquals}}` renders the main block
/// when both arguments are strictly equal, the inverse block otherwise.
#[derive(Clone, Copy, Debug)]
pub struct IfEqualsHelper;

impl HelperDef for IfEqualsHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        reg: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        render_equality_block(h, reg, ctx, rc, out, true)
    }
}

/// `{{#unlessEquals a b}}...{{else}}...{{/unlessEquals}}` renders the main
/// block when the arguments differ, the inverse block otherwise.
#[derive(Clone, Copy, Debug)]
pub struct UnlessEqualsHelper;

impl HelperDef for UnlessEqualsHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        reg: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        render_equality_block(h, reg, ctx, rc, out, false)
    }
}
