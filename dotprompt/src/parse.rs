//! Parsing of `.prompt` documents and of rendered marker streams.
//!
//! Two parsers live here. [`parse_document`] splits a source document into
//! YAML frontmatter and template body, partitions the frontmatter into
//! reserved fields and namespaced extension fields, and produces a
//! [`ParsedPrompt`]. [`to_messages`] runs after template rendering: it
//! splits the rendered string on sentinel markers, groups the pieces into
//! role-tagged messages, parses media and section markers into parts, and
//! inserts caller-supplied history at the correct position.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::message::{DataArgument, Message, Part, Role};
use crate::metadata::{ParsedPrompt, PromptMetadata};

/// Prefix of role markers in rendered output.
pub const ROLE_MARKER_PREFIX: &str = "<<<dotprompt:role:";

/// Prefix of history markers in rendered output.
pub const HISTORY_MARKER_PREFIX: &str = "<<<dotprompt:history";

/// Prefix of media markers in rendered output.
pub const MEDIA_MARKER_PREFIX: &str = "<<<dotprompt:media:";

/// Prefix of section markers in rendered output.
pub const SECTION_MARKER_PREFIX: &str = "<<<dotprompt:section";

// Matches YAML frontmatter delimited by `---` lines at the start of a
// document. Trailing whitespace on the delimiter lines is accepted, and the
// newline before the closing delimiter is optional so an empty frontmatter
// block still matches.
static FRONTMATTER_AND_BODY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---\s*\n(.*?)\n?---\s*\n(.*)\z").expect("frontmatter regex is valid")
});

// Matches `<<<dotprompt:role:xxx>>>` and `<<<dotprompt:history>>>` markers.
// Only lowercase letters are allowed after `role:`; anything else is left in
// the text untouched. The capture excludes the closing `>>>`.
static ROLE_AND_HISTORY_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<<<dotprompt:(?:role:[a-z]+|history))>>>").expect("role marker regex is valid")
});

// Matches `<<<dotprompt:media:url ...>>>` and `<<<dotprompt:section ...>>>`
// markers. `.` does not match newlines, so a marker must be rendered on a
// single line to be recognized.
static MEDIA_AND_SECTION_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<<<dotprompt:(?:media:url|section).*?)>>>").expect("media marker regex is valid")
});

/// Reserved frontmatter keywords handled as prompt metadata; every other
/// key is either a namespaced extension field or ignored.
pub const RESERVED_METADATA_KEYWORDS: &[&str] = &[
    // NOTE: KEEP SORTED
    "config",
    "description",
    "ext",
    "input",
    "metadata",
    "model",
    "name",
    "output",
    "raw",
    "toolDefs",
    "tools",
    "variant",
    "version",
];

/// Splits a string by a marker regex, keeping each marker (minus its closing
/// `>>>`) as its own piece and dropping empty or whitespace-only pieces.
pub(crate) fn split_by_regex(source: &str, regex: &Regex) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for found in regex.find_iter(source) {
        pieces.push(source[last..found.start()].to_owned());
        let marker = found.as_str();
        pieces.push(marker.strip_suffix(">>>").unwrap_or(marker).to_owned());
        last = found.end();
    }
    pieces.push(source[last..].to_owned());
    pieces.retain(|piece| !piece.trim().is_empty());
    pieces
}

fn split_by_role_and_history_markers(rendered: &str) -> Vec<String> {
    split_by_regex(rendered, &ROLE_AND_HISTORY_MARKER_REGEX)
}

fn split_by_media_and_section_markers(source: &str) -> Vec<String> {
    split_by_regex(source, &MEDIA_AND_SECTION_MARKER_REGEX)
}

fn normalize_line_endings(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

/// Base metadata for documents with no usable frontmatter: empty `ext`,
/// `config`, and `metadata` maps.
fn base_metadata() -> PromptMetadata {
    PromptMetadata {
        ext: Some(Map::new()),
        config: Some(Map::new()),
        metadata: Some(Map::new()),
        ..Default::default()
    }
}

/// Parses a document containing optional YAML frontmatter and a template.
///
/// Line endings are normalized to `\n` before parsing. When the document has
/// no frontmatter the full source becomes the template, untrimmed. When the
/// frontmatter fails to parse as YAML the error is swallowed and the full
/// source, trimmed, becomes the template. When the frontmatter parses, the
/// template is the body with leading and trailing whitespace trimmed.
#[must_use]
pub fn parse_document(source: &str) -> ParsedPrompt {
    let source = normalize_line_endings(source);

    let Some(caps) = FRONTMATTER_AND_BODY_REGEX.captures(&source) else {
        return ParsedPrompt {
            meta: base_metadata(),
            template: source,
        };
    };
    let frontmatter = &caps[1];
    let body = &caps[2];

    let Some(raw) = parse_yaml_mapping(frontmatter) else {
        return ParsedPrompt {
            meta: base_metadata(),
            template: source.trim().to_owned(),
        };
    };

    let mut pruned = Map::new();
    let mut ext = Map::new();
    for (key, value) in &raw {
        if key == "ext" || key == "raw" {
            // Recomputed below; never taken from the document verbatim.
            continue;
        }
        if RESERVED_METADATA_KEYWORDS.contains(&key.as_str()) {
            pruned.insert(key.clone(), value.clone());
        } else if key.contains('.') {
            insert_namespaced_entry(&mut ext, key, value.clone());
        }
    }

    let Ok(mut meta) = serde_json::from_value::<PromptMetadata>(Value::Object(pruned)) else {
        return ParsedPrompt {
            meta: base_metadata(),
            template: body.trim().to_owned(),
        };
    };

    meta.raw = Some(raw);
    meta.ext = Some(ext);
    if meta.config.is_none() {
        meta.config = Some(Map::new());
    }
    if meta.metadata.is_none() {
        meta.metadata = Some(Map::new());
    }

    ParsedPrompt {
        meta,
        template: body.trim().to_owned(),
    }
}

/// Parses frontmatter as a YAML mapping. Returns `None` on YAML errors,
/// non-mapping documents, or non-string keys; the caller falls back to a
/// body-only prompt.
fn parse_yaml_mapping(frontmatter: &str) -> Option<Map<String, Value>> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(frontmatter).ok()?;
    if yaml.is_null() {
        return Some(Map::new());
    }
    match serde_json::to_value(yaml).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Splits a dotted key at its last `.` and files the value under
/// `ext[namespace][field]`. Goes only a single level deep.
fn insert_namespaced_entry(ext: &mut Map<String, Value>, key: &str, value: Value) {
    let Some(last_dot) = key.rfind('.') else {
        return;
    };
    let namespace = &key[..last_dot];
    let field = &key[last_dot + 1..];

    let entry = ext
        .entry(namespace.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(map) = entry.as_object_mut() {
        map.insert(field.to_owned(), value);
    }
}

/// A message under construction during the marker walk: either raw source
/// text still to be parsed into parts, or content carried over from history.
struct MessageSource {
    role: Role,
    source: String,
    content: Option<Vec<Part>>,
    metadata: Option<Map<String, Value>>,
}

impl MessageSource {
    fn new(role: Role) -> Self {
        Self {
            role,
            source: String::new(),
            content: None,
            metadata: None,
        }
    }
}

/// Converts a rendered template string into an ordered list of messages.
///
/// Role markers open new messages (or retag an empty current message);
/// history markers splice in the caller's messages tagged with
/// `purpose: history` and continue with a fresh `model` message. Pieces of
/// text accumulate into the current message and are parsed into parts once
/// the walk completes.
pub fn to_messages(rendered: &str, data: Option<&DataArgument>) -> Result<Vec<Message>> {
    let mut sources = vec![MessageSource::new(Role::User)];
    let mut current = 0;

    for piece in split_by_role_and_history_markers(rendered) {
        if let Some(role_name) = piece.strip_prefix(ROLE_MARKER_PREFIX) {
            let role = Role::from_marker(role_name);
            if sources[current].source.trim().is_empty() {
                // Leading empty message: rewrite its role in place.
                sources[current].role = role;
            } else {
                sources.push(MessageSource::new(role));
                current = sources.len() - 1;
            }
        } else if piece.starts_with(HISTORY_MARKER_PREFIX) {
            let history = data
                .and_then(|d| d.messages.as_deref())
                .map(transform_messages_to_history)
                .unwrap_or_default();
            for message in history {
                sources.push(MessageSource {
                    role: message.role,
                    source: String::new(),
                    content: Some(message.content),
                    metadata: message.metadata,
                });
            }
            sources.push(MessageSource::new(Role::Model));
            current = sources.len() - 1;
        } else {
            sources[current].source.push_str(&piece);
        }
    }

    let messages = message_sources_to_messages(sources)?;
    Ok(insert_history(
        messages,
        data.and_then(|d| d.messages.as_deref()),
    ))
}

fn message_sources_to_messages(sources: Vec<MessageSource>) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for source in sources {
        if source.content.is_none() && source.source.is_empty() {
            continue;
        }
        let content = match source.content {
            Some(content) => content,
            None => to_parts(&source.source)?,
        };
        let mut message = Message::new(source.role, content);
        if source.metadata.as_ref().is_some_and(|m| !m.is_empty()) {
            message.metadata = source.metadata;
        }
        messages.push(message);
    }
    Ok(messages)
}

/// Tags each message with `purpose: history`, preserving other metadata.
fn transform_messages_to_history(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .cloned()
        .map(|message| message.with_metadata("purpose", Value::String("history".to_owned())))
        .collect()
}

fn messages_have_history(messages: &[Message]) -> bool {
    messages
        .iter()
        .any(|message| message.purpose() == Some("history"))
}

/// Inserts historical messages into a conversation that did not contain a
/// history marker: before the final user message when there is one, at the
/// end otherwise. Conversations that already carry history are unchanged,
/// and the inserted messages are the caller's originals, unmodified.
fn insert_history(mut messages: Vec<Message>, history: Option<&[Message]>) -> Vec<Message> {
    let Some(history) = history else {
        return messages;
    };
    if history.is_empty() || messages_have_history(&messages) {
        return messages;
    }

    if messages.is_empty() {
        return history.to_vec();
    }

    if messages.last().is_some_and(|last| last.role.is_user()) {
        let last = messages.remove(messages.len() - 1);
        messages.extend_from_slice(history);
        messages.push(last);
    } else {
        messages.extend_from_slice(history);
    }
    messages
}

/// Parses a message source string into parts, honoring media and section
/// markers.
fn to_parts(source: &str) -> Result<Vec<Part>> {
    split_by_media_and_section_markers(source)
        .into_iter()
        .map(|piece| parse_part(&piece))
        .collect()
}

fn parse_part(piece: &str) -> Result<Part> {
    if piece.starts_with(MEDIA_MARKER_PREFIX) {
        parse_media_part(piece)
    } else if piece.starts_with(SECTION_MARKER_PREFIX) {
        parse_section_part(piece)
    } else {
        Ok(Part::text(piece))
    }
}

fn parse_media_part(piece: &str) -> Result<Part> {
    let fields: Vec<&str> = piece.split(' ').collect();
    match fields.as_slice() {
        [_, url] => Ok(Part::media(*url)),
        [_, url, content_type] => {
            if content_type.trim().is_empty() {
                Ok(Part::media(*url))
            } else {
                Ok(Part::media_with_type(*url, *content_type))
            }
        }
        _ => Err(Error::invalid_marker(format!(
            "media piece '{piece}' must have 2 or 3 fields, found {}",
            fields.len()
        ))),
    }
}

fn parse_section_part(piece: &str) -> Result<Part> {
    let fields: Vec<&str> = piece.split(' ').collect();
    match fields.as_slice() {
        [_, purpose] => Ok(Part::pending_with_purpose(*purpose)),
        _ => Err(Error::invalid_marker(format!(
            "section piece '{piece}' must have 2 fields, found {}",
            fields.len()
        ))),
    }
}
