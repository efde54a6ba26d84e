//! External tool naming and input-schema sanitization
//!
//! LLM tool-calling APIs accept tool names and parameter keys matching
//! `[A-Za-z0-9_-]` only, with tool names capped at [`MAX_TOOL_NAME_LEN`]
//! characters. MCP servers are under no such constraint, and two servers may
//! expose tools with the same name. This module derives API-safe names:
//!
//! - External tool names are `<origin>__<tool>` after [`normalize_name`].
//!   Names that would exceed the cap are truncated and suffixed with a short
//!   SHA-256 digest of the `(origin, tool)` pair, so distinct long names stay
//!   distinct.
//! - Top-level schema property keys go through [`sanitize_property_key`];
//!   keys that collide after sanitization receive `_2`, `_3`, ... suffixes.
//!   The sanitized-to-original map lets dispatch restore the keys the server
//!   expects.
//!
//! All functions here are pure and deterministic.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Longest external tool name accepted by tool-calling APIs.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Separator between the origin key and the tool name.
pub const ORIGIN_SEPARATOR: &str = "__";

/// Hex characters of digest appended to over-long names.
const DIGEST_HEX_LEN: usize = 8;

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Normalize an origin key or tool name for use in an external name.
///
/// `.`, `/`, `:` and whitespace become `_`; every other character outside
/// `[A-Za-z0-9_-]` is dropped.
///
/// # Examples
///
/// ```
/// use toolmux::tools::naming::normalize_name;
///
/// assert_eq!(normalize_name("fs.read file"), "fs_read_file");
/// assert_eq!(normalize_name("git/log:oneline"), "git_log_oneline");
/// assert_eq!(normalize_name("résumé!"), "rsum");
/// ```
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '.' | '/' | ':' => Some('_'),
            c if c.is_whitespace() => Some('_'),
            c if is_allowed(c) => Some(c),
            _ => None,
        })
        .collect()
}

/// Sanitize one schema property key: every character outside
/// `[A-Za-z0-9_-]` becomes `_`.
///
/// An empty key becomes `_`.
///
/// # Examples
///
/// ```
/// use toolmux::tools::naming::sanitize_property_key;
///
/// assert_eq!(sanitize_property_key("file.path"), "file_path");
/// assert_eq!(sanitize_property_key("max-depth"), "max-depth");
/// ```
pub fn sanitize_property_key(key: &str) -> String {
    if key.is_empty() {
        return "_".to_string();
    }
    key.chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect()
}

/// Build the external name for `tool` exposed by `origin`.
///
/// The result is at most [`MAX_TOOL_NAME_LEN`] characters. It is not
/// guaranteed unique across a table; see [`uniquify`].
///
/// # Examples
///
/// ```
/// use toolmux::tools::naming::external_name;
///
/// assert_eq!(external_name("files", "read_file"), "files__read_file");
/// assert_eq!(external_name("a".repeat(40).as_str(), &"b".repeat(40)).len(), 64);
/// ```
pub fn external_name(origin: &str, tool: &str) -> String {
    let name = format!(
        "{}{}{}",
        normalize_name(origin),
        ORIGIN_SEPARATOR,
        normalize_name(tool)
    );
    if name.len() <= MAX_TOOL_NAME_LEN {
        return name;
    }

    let mut hasher = Sha256::new();
    hasher.update(origin.as_bytes());
    hasher.update([0u8]);
    hasher.update(tool.as_bytes());
    let digest = hex_prefix(&hasher.finalize(), DIGEST_HEX_LEN);

    // Normalized names are ASCII, so byte truncation is safe.
    let keep = MAX_TOOL_NAME_LEN - DIGEST_HEX_LEN - 1;
    format!("{}_{}", &name[..keep], digest)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    out.truncate(len);
    out
}

/// Return `name`, or `name_2`, `name_3`, ... whichever is not in `taken`.
///
/// The base is shortened as needed to keep the result within
/// [`MAX_TOOL_NAME_LEN`].
pub fn uniquify(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    (2usize..)
        .map(|n| {
            let suffix = format!("_{n}");
            let keep = name.len().min(MAX_TOOL_NAME_LEN.saturating_sub(suffix.len()));
            format!("{}{}", &name[..keep], suffix)
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// An input schema rewritten with API-safe property keys.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSchema {
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    pub schema: Value,
    /// Sanitized key to original key, for renamed keys only.
    pub key_map: BTreeMap<String, String>,
}

/// Rewrite a tool's input schema for an LLM tool-calling API.
///
/// Only top-level `properties` keys are rewritten; property values are kept
/// verbatim. Keys that are already valid keep their name. Renamed keys that
/// collide receive numeric suffixes, in sorted order of the original keys.
/// `required` entries follow their property's new name.
pub fn sanitize_input_schema(schema: &Value) -> SanitizedSchema {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut renamed: BTreeMap<&str, String> = BTreeMap::new();
    let mut taken: HashSet<String> = properties
        .keys()
        .filter(|k| sanitize_property_key(k) == **k)
        .cloned()
        .collect();

    for key in properties.keys() {
        let clean = sanitize_property_key(key);
        if clean == *key {
            continue;
        }
        let mut candidate = clean.clone();
        let mut n = 2;
        while taken.contains(&candidate) {
            candidate = format!("{clean}_{n}");
            n += 1;
        }
        if candidate != clean {
            tracing::warn!(
                "schema property `{key}` collides after sanitization; exposing it as `{candidate}`"
            );
        }
        taken.insert(candidate.clone());
        renamed.insert(key.as_str(), candidate);
    }

    let mut clean_properties = Map::new();
    let mut key_map = BTreeMap::new();
    for (key, value) in properties {
        match renamed.get(key.as_str()) {
            Some(clean) => {
                key_map.insert(clean.clone(), key.clone());
                clean_properties.insert(clean.clone(), value.clone());
            }
            None => {
                clean_properties.insert(key.clone(), value.clone());
            }
        }
    }

    let mut out = Map::new();
    out.insert("type".to_string(), Value::String("object".to_string()));
    out.insert("properties".to_string(), Value::Object(clean_properties));
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let required: Vec<Value> = required
            .iter()
            .filter_map(Value::as_str)
            .map(|name| {
                let mapped = renamed
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| sanitize_property_key(name));
                Value::String(mapped)
            })
            .collect();
        out.insert("required".to_string(), Value::Array(required));
    }

    SanitizedSchema {
        schema: Value::Object(out),
        key_map,
    }
}

/// Rename sanitized argument keys back to the names the server declared.
///
/// Non-object arguments and keys absent from `key_map` pass through.
pub fn restore_argument_keys(arguments: Value, key_map: &BTreeMap<String, String>) -> Value {
    if key_map.is_empty() {
        return arguments;
    }
    match arguments {
        Value::Object(args) => Value::Object(
            args.into_iter()
                .map(|(key, value)| match key_map.get(&key) {
                    Some(original) => (original.clone(), value),
                    None => (key, value),
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_name_separators_and_stripping() {
        assert_eq!(normalize_name("read_file"), "read_file");
        assert_eq!(normalize_name("fs.read"), "fs_read");
        assert_eq!(normalize_name("a/b:c d\te"), "a_b_c_d_e");
        assert_eq!(normalize_name("tool@v2!"), "toolv2");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn test_normalize_name_is_idempotent() {
        for raw in ["fs.read file", "x/y:z", "ünïcode-tool", "__a__", ""] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn test_sanitize_property_key_is_idempotent() {
        for raw in ["file.path", "a b", "ok_key", "", "日本"] {
            let once = sanitize_property_key(raw);
            assert_eq!(sanitize_property_key(&once), once, "input {raw:?}");
            assert!(once.chars().all(is_allowed));
        }
    }

    #[test]
    fn test_external_name_distinguishes_origins() {
        assert_eq!(external_name("files", "read_file"), "files__read_file");
        assert_eq!(external_name("backup", "read_file"), "backup__read_file");
        assert_eq!(external_name("my.server", "git/log"), "my_server__git_log");
    }

    #[test]
    fn test_long_external_names_are_capped_and_distinct() {
        let origin = "o".repeat(30);
        let a = external_name(&origin, &format!("{}_alpha", "t".repeat(40)));
        let b = external_name(&origin, &format!("{}_beta", "t".repeat(40)));
        assert_eq!(a.len(), MAX_TOOL_NAME_LEN);
        assert_eq!(b.len(), MAX_TOOL_NAME_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(is_allowed));
        // Deterministic.
        assert_eq!(a, external_name(&origin, &format!("{}_alpha", "t".repeat(40))));
    }

    #[test]
    fn test_uniquify_appends_counter() {
        let mut taken = HashSet::new();
        assert_eq!(uniquify("x__a", &taken), "x__a");
        taken.insert("x__a".to_string());
        assert_eq!(uniquify("x__a", &taken), "x__a_2");
        taken.insert("x__a_2".to_string());
        assert_eq!(uniquify("x__a", &taken), "x__a_3");
    }

    #[test]
    fn test_uniquify_respects_length_cap() {
        let name = "n".repeat(MAX_TOOL_NAME_LEN);
        let taken: HashSet<String> = [name.clone()].into_iter().collect();
        let unique = uniquify(&name, &taken);
        assert_eq!(unique.len(), MAX_TOOL_NAME_LEN);
        assert!(unique.ends_with("_2"));
    }

    #[test]
    fn test_sanitize_schema_renames_and_maps_keys() {
        let schema = json!({
            "type": "object",
            "properties": {
                "file.path": { "type": "string" },
                "max-depth": { "type": "integer" }
            },
            "required": ["file.path"]
        });
        let out = sanitize_input_schema(&schema);
        assert_eq!(
            out.schema,
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "max-depth": { "type": "integer" }
                },
                "required": ["file_path"]
            })
        );
        assert_eq!(out.key_map.get("file_path").map(String::as_str), Some("file.path"));
        assert_eq!(out.key_map.len(), 1);
    }

    #[test]
    fn test_sanitize_schema_collisions_get_suffixes() {
        let schema = json!({
            "properties": {
                "a_b": { "description": "clean" },
                "a.b": { "description": "dotted" },
                "a b": { "description": "spaced" }
            },
            "required": ["a.b", "a b", "a_b"]
        });
        let out = sanitize_input_schema(&schema);
        let props = out.schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), 3);
        // The already-valid key keeps its name.
        assert_eq!(props["a_b"]["description"], "clean");
        // Renamed keys are assigned in sorted order: "a b" < "a.b".
        assert_eq!(props["a_b_2"]["description"], "spaced");
        assert_eq!(props["a_b_3"]["description"], "dotted");
        assert_eq!(out.schema["required"], json!(["a_b_3", "a_b_2", "a_b"]));
        assert_eq!(out.key_map["a_b_3"], "a.b");
    }

    #[test]
    fn test_sanitize_schema_is_idempotent() {
        let schema = json!({
            "type": "object",
            "properties": { "x.y": {}, "x_y": {}, "z": {} },
            "required": ["x.y"]
        });
        let once = sanitize_input_schema(&schema);
        let twice = sanitize_input_schema(&once.schema);
        assert_eq!(twice.schema, once.schema);
        assert!(twice.key_map.is_empty());
    }

    #[test]
    fn test_sanitize_schema_without_properties() {
        let out = sanitize_input_schema(&json!({ "type": "object" }));
        assert_eq!(out.schema, json!({ "type": "object", "properties": {} }));
    }

    #[test]
    fn test_restore_argument_keys() {
        let key_map: BTreeMap<String, String> =
            [("file_path".to_string(), "file.path".to_string())].into_iter().collect();
        let restored = restore_argument_keys(json!({ "file_path": "/tmp/a", "mode": "r" }), &key_map);
        assert_eq!(restored, json!({ "file.path": "/tmp/a", "mode": "r" }));
        assert_eq!(restore_argument_keys(json!(null), &key_map), json!(null));
    }
}
