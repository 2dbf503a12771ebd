//! Strict JSON Schema production and structured-output parsing.
//!
//! OpenAI strict mode requires `type: object` schemas where every
//! property is required and `additionalProperties` is false, applied
//! recursively through nested objects and array items.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output schema descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured-output descriptor attached to a request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl OutputSchema {
    /// Build a strict descriptor from any object schema. The schema is
    /// rewritten in place via [`strict_schema`].
    pub fn strict(name: impl Into<String>, schema: Value) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            schema: strict_schema(schema)?,
            strict: true,
        })
    }

    /// Parse a model output text against this descriptor.
    pub fn parse<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        parse_structured(text)
    }

    /// Parse a model output text into a raw JSON value.
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        parse_structured(text)
    }
}

/// Deserialize a structured output blob into a typed value.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(Error::Json)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strict rewriting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rewrite a JSON Schema into OpenAI-strict form.
///
/// Every object gains `required: [all property names]` and
/// `additionalProperties: false`; the rewrite recurses through
/// `properties`, `items`, `$defs`/`definitions`, and `anyOf`.
pub fn strict_schema(mut schema: Value) -> Result<Value> {
    if !schema.is_object() {
        return Err(Error::Configuration(
            "structured output schema must be a JSON object".into(),
        ));
    }
    make_strict(&mut schema);
    Ok(schema)
}

fn make_strict(node: &mut Value) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    let is_object_schema = obj.get("type").and_then(Value::as_str) == Some("object")
        || obj.contains_key("properties");

    if is_object_schema {
        let names: Vec<Value> = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().map(Value::String).collect())
            .unwrap_or_default();
        obj.insert("required".into(), Value::Array(names));
        obj.insert("additionalProperties".into(), Value::Bool(false));
    }

    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, prop) in props.iter_mut() {
            make_strict(prop);
        }
    }
    if let Some(items) = obj.get_mut("items") {
        make_strict(items);
    }
    for key in ["$defs", "definitions"] {
        if let Some(defs) = obj.get_mut(key).and_then(Value::as_object_mut) {
            for (_, def) in defs.iter_mut() {
                make_strict(def);
            }
        }
    }
    if let Some(any_of) = obj.get_mut("anyOf").and_then(Value::as_array_mut) {
        for branch in any_of.iter_mut() {
            make_strict(branch);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enum helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Match an input against a set of enum variant names.
///
/// Wire encoding is lower case; matching is case-insensitive. On a miss
/// the error message lists every legal value.
pub fn match_enum_variant(input: &str, variants: &[&str]) -> Result<usize> {
    let needle = input.trim();
    for (i, v) in variants.iter().enumerate() {
        if v.eq_ignore_ascii_case(needle) {
            return Ok(i);
        }
    }
    Err(Error::InvalidRequest(format!(
        "unknown value '{input}': expected one of [{}]",
        variants.join(", ")
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_marks_all_properties_required() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            }
        });
        let strict = strict_schema(schema).unwrap();
        let required: Vec<&str> = strict["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"name"));
        assert!(required.contains(&"age"));
        assert_eq!(strict["additionalProperties"], false);
    }

    #[test]
    fn strict_recurses_into_nested_objects_and_arrays() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "address": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                },
                "tags": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"label": {"type": "string"}}
                    }
                }
            }
        });
        let strict = strict_schema(schema).unwrap();
        assert_eq!(strict["properties"]["address"]["additionalProperties"], false);
        assert_eq!(
            strict["properties"]["address"]["required"],
            serde_json::json!(["city"])
        );
        assert_eq!(
            strict["properties"]["tags"]["items"]["required"],
            serde_json::json!(["label"])
        );
    }

    #[test]
    fn strict_rejects_non_object() {
        assert!(strict_schema(serde_json::json!("string")).is_err());
    }

    #[test]
    fn parse_structured_roundtrip() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Answer {
            value: i64,
        }
        let parsed: Answer = parse_structured(r#"{"value": 42}"#).unwrap();
        assert_eq!(parsed, Answer { value: 42 });
        assert!(parse_structured::<Answer>("not json").is_err());
    }

    #[test]
    fn enum_matching_is_case_insensitive() {
        let variants = ["retry", "dead_letter", "drop"];
        assert_eq!(match_enum_variant("RETRY", &variants).unwrap(), 0);
        assert_eq!(match_enum_variant("Dead_Letter", &variants).unwrap(), 1);
    }

    #[test]
    fn enum_mismatch_lists_legal_values() {
        let err = match_enum_variant("bogus", &["a", "b"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'bogus'"));
        assert!(msg.contains("a, b"));
    }
}
