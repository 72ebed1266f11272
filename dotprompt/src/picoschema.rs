//! Picoschema: a compact schema DSL desugared to JSON Schema.
//!
//! Picoschema is the schema notation accepted in `.prompt` frontmatter
//! wherever a schema is expected. It compiles to a subset of JSON Schema:
//!
//! ```yaml
//! input:
//!   schema:
//!     id: string, unique identifier
//!     subtitle?: string
//!     price: number
//!     status(enum): [ACTIVE, INACTIVE]
//!     tags(array, list of tags): string
//!     address(object):
//!       city: string
//!     attributes(object):
//!       (*): any
//! ```
//!
//! Fields are required unless suffixed with `?`; optional fields are also
//! nullable. A comma inside a type spec separates the type from a
//! description. Parenthetical constructors cover `array`, `object`, and
//! `enum`; the `(*)` wildcard sets `additionalProperties`. Any other bare
//! name is resolved as a named schema through the configured resolver.
//!
//! Inputs that already look like JSON Schema (a top-level scalar, `object`,
//! or `array` `type`, or a `properties` map) pass through untouched.

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::resolver::SchemaResolver;

/// Scalar type names accepted by Picoschema.
pub const JSON_SCHEMA_SCALAR_TYPES: &[&str] =
    &["string", "boolean", "null", "number", "integer", "any"];

/// Property name that sets `additionalProperties` on an object.
pub const WILDCARD_PROPERTY_NAME: &str = "(*)";

/// Options for the Picoschema transformer.
#[derive(Default)]
pub struct PicoschemaOptions<'a> {
    /// Resolver for named schema references.
    pub schema_resolver: Option<&'a dyn SchemaResolver>,
}

/// Transforms a Picoschema definition into JSON Schema.
///
/// Returns `Ok(None)` when the input is absent or null. Inputs already in
/// JSON Schema form are returned as-is.
pub async fn picoschema(
    schema: Option<&Value>,
    options: PicoschemaOptions<'_>,
) -> Result<Option<Value>> {
    PicoschemaParser::new(options.schema_resolver)
        .parse(schema)
        .await
}

/// Parser for Picoschema definitions.
pub struct PicoschemaParser<'a> {
    schema_resolver: Option<&'a dyn SchemaResolver>,
}

impl<'a> PicoschemaParser<'a> {
    /// Creates a parser with an optional named-schema resolver.
    #[must_use]
    pub fn new(schema_resolver: Option<&'a dyn SchemaResolver>) -> Self {
        Self { schema_resolver }
    }

    /// Parses a schema, detecting whether it is Picoschema or JSON Schema.
    pub async fn parse(&self, schema: Option<&Value>) -> Result<Option<Value>> {
        let Some(schema) = schema else {
            return Ok(None);
        };
        if schema.is_null() {
            return Ok(None);
        }

        // Top-level named schemas and scalars.
        if let Value::String(spec) = schema {
            let (type_name, description) = extract_description(spec);
            if JSON_SCHEMA_SCALAR_TYPES.contains(&type_name.as_str()) {
                let mut out = Map::new();
                out.insert("type".to_owned(), Value::String(type_name));
                if let Some(description) = description {
                    out.insert("description".to_owned(), Value::String(description));
                }
                return Ok(Some(Value::Object(out)));
            }
            let resolved = self.must_resolve_schema(&type_name).await?;
            return Ok(Some(attach_description(resolved, description)));
        }

        if let Value::Object(map) = schema {
            // A JSON Schema-ish `type` at the top level ejects to JSON Schema.
            if let Some(type_name) = map.get("type").and_then(Value::as_str)
                && (JSON_SCHEMA_SCALAR_TYPES.contains(&type_name)
                    || type_name == "object"
                    || type_name == "array")
            {
                return Ok(Some(schema.clone()));
            }

            if map.get("properties").is_some_and(Value::is_object) {
                let mut out = map.clone();
                out.insert("type".to_owned(), Value::String("object".to_owned()));
                return Ok(Some(Value::Object(out)));
            }
        }

        Ok(Some(self.parse_pico(schema).await?))
    }

    async fn must_resolve_schema(&self, schema_name: &str) -> Result<Value> {
        let Some(resolver) = self.schema_resolver else {
            return Err(Error::picoschema(format!(
                "unsupported scalar type '{schema_name}'"
            )));
        };
        match resolver.resolve_schema(schema_name).await? {
            Some(schema) => Ok(schema),
            None => Err(Error::schema_not_found(schema_name)),
        }
    }

    /// Recursively parses a Picoschema fragment (a mapping or a type spec
    /// string) into JSON Schema.
    fn parse_pico<'b>(&'b self, obj: &'b Value) -> BoxFuture<'b, Result<Value>> {
        Box::pin(async move {
            let map = match obj {
                Value::String(spec) => {
                    let (type_name, description) = extract_description(spec);
                    if !JSON_SCHEMA_SCALAR_TYPES.contains(&type_name.as_str()) {
                        let resolved = self.must_resolve_schema(&type_name).await?;
                        return Ok(attach_description(resolved, description));
                    }

                    // `any` compiles to the empty schema.
                    let mut out = Map::new();
                    if type_name != "any" {
                        out.insert("type".to_owned(), Value::String(type_name));
                    }
                    if let Some(description) = description {
                        out.insert("description".to_owned(), Value::String(description));
                    }
                    return Ok(Value::Object(out));
                }
                Value::Object(map) => map,
                other => {
                    return Err(Error::picoschema(format!(
                        "only consists of objects and strings. Got: {other}"
                    )));
                }
            };

            let mut properties = Map::new();
            let mut required: Vec<String> = Vec::new();
            let mut additional_properties = Value::Bool(false);

            for (key, value) in map {
                if key == WILDCARD_PROPERTY_NAME {
                    additional_properties = self.parse_pico(value).await?;
                    continue;
                }

                let (name, paren) = match key.split_once('(') {
                    Some((name, paren)) => (name, Some(paren)),
                    None => (key.as_str(), None),
                };
                let is_optional = name.ends_with('?');
                let property_name = name.strip_suffix('?').unwrap_or(name);

                if !is_optional {
                    required.push(property_name.to_owned());
                }

                let Some(paren) = paren else {
                    let mut prop = self.parse_pico(value).await?;
                    if is_optional {
                        make_nullable(&mut prop);
                    }
                    properties.insert(property_name.to_owned(), prop);
                    continue;
                };

                let type_spec = paren.strip_suffix(')').unwrap_or(paren);
                let (type_name, description) = extract_description(type_spec);
                let mut prop = match type_name.as_str() {
                    "array" => {
                        let items = self.parse_pico(value).await?;
                        let mut out = Map::new();
                        out.insert(
                            "type".to_owned(),
                            if is_optional {
                                Value::Array(vec![
                                    Value::String("array".to_owned()),
                                    Value::String("null".to_owned()),
                                ])
                            } else {
                                Value::String("array".to_owned())
                            },
                        );
                        out.insert("items".to_owned(), items);
                        Value::Object(out)
                    }
                    "object" => {
                        let mut out = self.parse_pico(value).await?;
                        if is_optional {
                            make_nullable(&mut out);
                        }
                        out
                    }
                    "enum" => {
                        let Some(values) = value.as_array() else {
                            return Err(Error::picoschema(format!(
                                "enum values for '{property_name}' must be a sequence"
                            )));
                        };
                        let mut values = values.clone();
                        if is_optional && !values.contains(&Value::Null) {
                            values.push(Value::Null);
                        }
                        let mut out = Map::new();
                        out.insert("enum".to_owned(), Value::Array(values));
                        Value::Object(out)
                    }
                    other => {
                        return Err(Error::picoschema(format!(
                            "parenthetical types must be 'object' or 'array', got: {other}"
                        )));
                    }
                };

                if let Some(description) = description
                    && let Some(out) = prop.as_object_mut()
                {
                    out.insert("description".to_owned(), Value::String(description));
                }
                properties.insert(property_name.to_owned(), prop);
            }

            let mut schema = Map::new();
            schema.insert("type".to_owned(), Value::String("object".to_owned()));
            schema.insert("properties".to_owned(), Value::Object(properties));
            if !required.is_empty() {
                required.sort();
                schema.insert(
                    "required".to_owned(),
                    Value::Array(required.into_iter().map(Value::String).collect()),
                );
            }
            schema.insert("additionalProperties".to_owned(), additional_properties);
            Ok(Value::Object(schema))
        })
    }
}

/// Rewrites a schema's scalar `type` to the nullable form `[type, "null"]`.
fn make_nullable(schema: &mut Value) {
    if let Some(map) = schema.as_object_mut()
        && let Some(Value::String(type_name)) = map.get("type").cloned()
    {
        map.insert(
            "type".to_owned(),
            Value::Array(vec![Value::String(type_name), Value::String("null".to_owned())]),
        );
    }
}

fn attach_description(mut schema: Value, description: Option<String>) -> Value {
    if let Some(description) = description
        && let Some(map) = schema.as_object_mut()
    {
        map.insert("description".to_owned(), Value::String(description));
    }
    schema
}

/// Splits a type spec at the first comma into type name and description,
/// trimming both.
fn extract_description(input: &str) -> (String, Option<String>) {
    match input.split_once(',') {
        Some((type_name, description)) => (
            type_name.trim().to_owned(),
            Some(description.trim().to_owned()),
        ),
        None => (input.trim().to_owned(), None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn transform(schema: Value) -> Result<Option<Value>> {
        picoschema(Some(&schema), PicoschemaOptions::default()).await
    }

    mod scalars {
        use super::*;

        #[tokio::test]
        async fn null_input_returns_none() {
            let out = picoschema(None, PicoschemaOptions::default()).await.unwrap();
            assert_eq!(out, None);
            let out = transform(Value::Null).await.unwrap();
            assert_eq!(out, None);
        }

        #[tokio::test]
        async fn bare_scalar_string() {
            let out = transform(json!("string")).await.unwrap();
            assert_eq!(out, Some(json!({"type": "string"})));
        }

        #[tokio::test]
        async fn scalar_with_description() {
            let out = transform(json!("number, the price")).await.unwrap();
            assert_eq!(
                out,
                Some(json!({"type": "number", "description": "the price"}))
            );
        }

        #[tokio::test]
        async fn unknown_scalar_without_resolver_fails() {
            let err = transform(json!("Person")).await.unwrap_err();
            assert!(err.to_string().contains("unsupported scalar type 'Person'"));
        }
    }

    mod objects {
        use super::*;

        #[tokio::test]
        async fn simple_object_with_required_fields() {
            let out = transform(json!({"name": "string", "age": "integer"}))
                .await
                .unwrap();
            assert_eq!(
                out,
                Some(json!({
                    "type": "object",
                    "properties": {
                        "age": {"type": "integer"},
                        "name": {"type": "string"},
                    },
                    "required": ["age", "name"],
                    "additionalProperties": false,
                }))
            );
        }

        #[tokio::test]
        async fn optional_field_becomes_nullable_and_unrequired() {
            let out = transform(json!({"subtitle?": "string"})).await.unwrap();
            assert_eq!(
                out,
                Some(json!({
                    "type": "object",
                    "properties": {
                        "subtitle": {"type": ["string", "null"]},
                    },
                    "additionalProperties": false,
                }))
            );
        }

        #[tokio::test]
        async fn required_is_sorted_alphabetically() {
            let out = transform(json!({"zebra": "string", "alpha": "string"}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out["required"], json!(["alpha", "zebra"]));
        }

        #[tokio::test]
        async fn field_description_is_attached() {
            let out = transform(json!({"id": "string, unique identifier"}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["id"],
                json!({"type": "string", "description": "unique identifier"})
            );
        }

        #[tokio::test]
        async fn any_type_is_empty_schema() {
            let out = transform(json!({"data?": "any"})).await.unwrap().unwrap();
            assert_eq!(out["properties"]["data"], json!({}));
        }

        #[tokio::test]
        async fn nested_objects_parse_recursively() {
            let out = transform(json!({"address": {"city": "string"}}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["address"],
                json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"],
                    "additionalProperties": false,
                })
            );
        }

        #[tokio::test]
        async fn non_object_non_string_fails() {
            let err = transform(json!(42)).await.unwrap_err();
            assert!(err.to_string().contains("objects and strings"));
        }
    }

    mod parentheticals {
        use super::*;

        #[tokio::test]
        async fn array_of_scalars() {
            let out = transform(json!({"tags(array)": "string"})).await.unwrap().unwrap();
            assert_eq!(
                out["properties"]["tags"],
                json!({"type": "array", "items": {"type": "string"}})
            );
        }

        #[tokio::test]
        async fn optional_array_with_description() {
            let out = transform(json!({"items?(array, list of items)": "string"}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["items"],
                json!({
                    "type": ["array", "null"],
                    "items": {"type": "string"},
                    "description": "list of items",
                })
            );
            assert_eq!(out.get("required"), None);
        }

        #[tokio::test]
        async fn required_enum() {
            let out = transform(json!({"status(enum)": ["active", "inactive"]}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["status"],
                json!({"enum": ["active", "inactive"]})
            );
            assert_eq!(out["required"], json!(["status"]));
        }

        #[tokio::test]
        async fn optional_enum_gains_null() {
            let out = transform(json!({"status?(enum)": ["active"]}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out["properties"]["status"], json!({"enum": ["active", null]}));
        }

        #[tokio::test]
        async fn optional_object_type_is_nullable() {
            let out = transform(json!({"address?(object)": {"city": "string"}}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["address"]["type"],
                json!(["object", "null"])
            );
        }

        #[tokio::test]
        async fn enum_with_description() {
            let out = transform(json!({"status(enum, current state)": ["on", "off"]}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                out["properties"]["status"],
                json!({"enum": ["on", "off"], "description": "current state"})
            );
        }

        #[tokio::test]
        async fn unknown_parenthetical_type_fails() {
            let err = transform(json!({"x(tuple)": "string"})).await.unwrap_err();
            assert!(err.to_string().contains("parenthetical types"));
        }

        #[tokio::test]
        async fn enum_with_non_sequence_value_fails() {
            let err = transform(json!({"x(enum)": "oops"})).await.unwrap_err();
            assert!(err.to_string().contains("must be a sequence"));
        }
    }

    mod wildcard {
        use super::*;

        #[tokio::test]
        async fn wildcard_sets_additional_properties() {
            let out = transform(json!({"name": "string", "(*)": "any"}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out["additionalProperties"], json!({}));
            assert_eq!(out["required"], json!(["name"]));
            assert!(out["properties"].get("(*)").is_none());
        }

        #[tokio::test]
        async fn typed_wildcard() {
            let out = transform(json!({"(*)": "string"})).await.unwrap().unwrap();
            assert_eq!(out["additionalProperties"], json!({"type": "string"}));
        }
    }

    mod pass_through {
        use super::*;

        #[tokio::test]
        async fn json_schema_object_passes_through() {
            let schema = json!({
                "type": "object",
                "properties": {"field1": {"type": "string"}},
            });
            let out = transform(schema.clone()).await.unwrap();
            assert_eq!(out, Some(schema));
        }

        #[tokio::test]
        async fn scalar_json_schema_passes_through() {
            let schema = json!({"type": "string", "description": "d"});
            let out = transform(schema.clone()).await.unwrap();
            assert_eq!(out, Some(schema));
        }

        #[tokio::test]
        async fn properties_map_gains_object_type() {
            let out = transform(json!({"properties": {"a": {"type": "string"}}}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out["type"], json!("object"));
        }

        #[tokio::test]
        async fn pass_through_is_idempotent() {
            let schema = json!({
                "type": "object",
                "properties": {"a": {"type": "number"}},
            });
            let once = transform(schema).await.unwrap().unwrap();
            let twice = transform(once.clone()).await.unwrap().unwrap();
            assert_eq!(once, twice);
        }
    }

    mod named_schemas {
        use super::*;
        use crate::resolver::schema_resolver_fn;

        #[tokio::test]
        async fn resolver_supplies_named_schema() {
            let resolver = schema_resolver_fn(|name| {
                (name == "Person").then(|| {
                    json!({"type": "object", "properties": {"name": {"type": "string"}}})
                })
            });
            let schema = json!("Person");
            let out = picoschema(
                Some(&schema),
                PicoschemaOptions {
                    schema_resolver: Some(resolver.as_ref()),
                },
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(out["type"], json!("object"));
        }

        #[tokio::test]
        async fn named_schema_with_description() {
            let resolver = schema_resolver_fn(|_| Some(json!({"type": "object"})));
            let schema = json!({"person": "Person, the person"});
            let out = picoschema(
                Some(&schema),
                PicoschemaOptions {
                    schema_resolver: Some(resolver.as_ref()),
                },
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(
                out["properties"]["person"],
                json!({"type": "object", "description": "the person"})
            );
        }

        #[tokio::test]
        async fn resolver_returning_none_fails() {
            let resolver = schema_resolver_fn(|_| None);
            let schema = json!("Missing");
            let err = picoschema(
                Some(&schema),
                PicoschemaOptions {
                    schema_resolver: Some(resolver.as_ref()),
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::SchemaNotFound(_)));
        }
    }
}
