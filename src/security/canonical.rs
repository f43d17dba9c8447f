//! Canonical JSON rendering.
//!
//! Signatures are computed over a deterministic rendering: mapping keys
//! sorted lexicographically at every depth, arrays order-preserving,
//! primitives rendered exactly as a standard compact JSON encoder would.
//! Two semantically equal mappings canonicalize byte-identically.

use std::collections::HashMap;

use serde_json::Value;

/// Renders a JSON value canonically.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Renders a flag mapping canonically, as used for bootstrap signatures.
pub fn canonicalize_map(map: &HashMap<String, Value>) -> String {
    let mut out = String::new();
    out.push('{');
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, &mut out);
        out.push(':');
        write_value(&map[*key], &mut out);
    }
    out.push('}');
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Display on primitives is serde_json's compact encoding.
        primitive => out.push_str(&primitive.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
