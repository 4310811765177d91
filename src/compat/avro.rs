//! Avro reader/writer compatibility.
//!
//! Operates on the resolved (but not yet canonicalized) schema tree, so
//! `doc`/`aliases`/`order` are still present — aliases in particular are
//! needed here to let a reader resolve a writer field that was renamed.

use std::collections::HashMap;

use serde_json::Value;

use crate::parser::avro::{fullname, index_named_types, AvroSchema};

pub fn is_compatible(reader: &AvroSchema, writer: &AvroSchema) -> (bool, Vec<String>) {
    let mut r_index = HashMap::new();
    index_named_types(&reader.resolved, "", &mut r_index);
    let mut w_index = HashMap::new();
    index_named_types(&writer.resolved, "", &mut w_index);

    let mut messages = Vec::new();
    check(&reader.resolved, &writer.resolved, &r_index, &w_index, &mut messages);
    (messages.is_empty(), messages)
}

/// Writer primitive -> set of reader primitives it may be widened to.
fn promotions(writer_type: &str) -> &'static [&'static str] {
    match writer_type {
        "int" => &["long", "float", "double"],
        "long" => &["float", "double"],
        "float" => &["double"],
        "string" => &["bytes"],
        "bytes" => &["string"],
        _ => &[],
    }
}

fn resolve_named<'a>(
    value: &'a Value,
    index: &'a HashMap<String, Value>,
) -> &'a Value {
    if let Value::String(name) = value {
        if let Some(def) = index.get(name.as_str()) {
            return def;
        }
    }
    value
}

fn kind_of(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(m) => m.get("type").and_then(|t| t.as_str()),
        _ => None,
    }
}

fn check(
    reader: &Value,
    writer: &Value,
    r_index: &HashMap<String, Value>,
    w_index: &HashMap<String, Value>,
    messages: &mut Vec<String>,
) -> bool {
    // Union handling takes priority over everything else.
    if let Value::Array(writer_branches) = writer {
        let mut all_ok = true;
        for wb in writer_branches {
            let ok = if let Value::Array(reader_branches) = reader {
                reader_branches
                    .iter()
                    .any(|rb| compatible_quiet(rb, wb, r_index, w_index))
            } else {
                compatible_quiet(reader, wb, r_index, w_index)
            };
            if !ok {
                messages.push(format!(
                    "writer union branch '{}' has no compatible reader branch",
                    describe(wb)
                ));
                all_ok = false;
            }
        }
        return all_ok;
    }
    if let Value::Array(reader_branches) = reader {
        let ok = reader_branches
            .iter()
            .any(|rb| compatible_quiet(rb, writer, r_index, w_index));
        if !ok {
            messages.push(format!(
                "writer schema '{}' is not compatible with any reader union branch",
                describe(writer)
            ));
        }
        return ok;
    }

    let reader = resolve_named(reader, r_index);
    let writer = resolve_named(writer, w_index);

    let (Some(rk), Some(wk)) = (kind_of(reader), kind_of(writer)) else {
        messages.push("could not determine schema kind during compatibility check".into());
        return false;
    };

    match (rk, wk) {
        ("record", "record") | ("error", "record") | ("record", "error") => {
            check_record(reader, writer, r_index, w_index, messages)
        }
        ("enum", "enum") => check_enum(reader, writer, messages),
        ("fixed", "fixed") => check_fixed(reader, writer, messages),
        ("array", "array") => check(
            reader.get("items").unwrap_or(&Value::Null),
            writer.get("items").unwrap_or(&Value::Null),
            r_index,
            w_index,
            messages,
        ),
        ("map", "map") => check(
            reader.get("values").unwrap_or(&Value::Null),
            writer.get("values").unwrap_or(&Value::Null),
            r_index,
            w_index,
            messages,
        ),
        (r, w) if r == w => true,
        (r, w) => {
            if promotions(w).contains(&r) {
                true
            } else {
                messages.push(format!("writer type '{w}' cannot be read as reader type '{r}'"));
                false
            }
        }
    }
}

fn compatible_quiet(
    reader: &Value,
    writer: &Value,
    r_index: &HashMap<String, Value>,
    w_index: &HashMap<String, Value>,
) -> bool {
    let mut throwaway = Vec::new();
    check(reader, writer, r_index, w_index, &mut throwaway)
}

fn check_record(
    reader: &Value,
    writer: &Value,
    r_index: &HashMap<String, Value>,
    w_index: &HashMap<String, Value>,
    messages: &mut Vec<String>,
) -> bool {
    let reader_fields = reader.get("fields").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let writer_fields = writer.get("fields").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut ok = true;
    for rf in &reader_fields {
        let rname = rf.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let raliases: Vec<&str> = rf
            .get("aliases")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str()).collect())
            .unwrap_or_default();

        let matching_writer_field = writer_fields.iter().find(|wf| {
            let wname = wf.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            wname == rname || raliases.contains(&wname)
        });

        match matching_writer_field {
            Some(wf) => {
                let rtype = rf.get("type").unwrap_or(&Value::Null);
                let wtype = wf.get("type").unwrap_or(&Value::Null);
                if !check(rtype, wtype, r_index, w_index, messages) {
                    ok = false;
                }
            }
            None => {
                if rf.get("default").is_none() {
                    messages.push(format!(
                        "reader field '{rname}' has no default and is missing from writer"
                    ));
                    ok = false;
                }
            }
        }
    }
    ok
}

fn check_enum(reader: &Value, writer: &Value, messages: &mut Vec<String>) -> bool {
    let reader_symbols: Vec<&str> = reader
        .get("symbols")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str()).collect())
        .unwrap_or_default();
    let writer_symbols: Vec<&str> = writer
        .get("symbols")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str()).collect())
        .unwrap_or_default();
    let has_default = reader.get("default").is_some();

    let missing: Vec<&str> = writer_symbols
        .iter()
        .filter(|s| !reader_symbols.contains(s))
        .copied()
        .collect();
    if missing.is_empty() {
        true
    } else if has_default {
        true
    } else {
        messages.push(format!(
            "writer enum symbols {missing:?} are not present in reader and reader has no default"
        ));
        false
    }
}

fn check_fixed(reader: &Value, writer: &Value, messages: &mut Vec<String>) -> bool {
    let r_ns = reader.get("namespace").and_then(|v| v.as_str()).unwrap_or("");
    let w_ns = writer.get("namespace").and_then(|v| v.as_str()).unwrap_or("");
    let r_name = fullname(reader.get("name").and_then(|v| v.as_str()).unwrap_or(""), r_ns);
    let w_name = fullname(writer.get("name").and_then(|v| v.as_str()).unwrap_or(""), w_ns);
    let r_size = reader.get("size").and_then(|v| v.as_i64());
    let w_size = writer.get("size").and_then(|v| v.as_i64());

    if r_name == w_name && r_size == w_size {
        true
    } else {
        messages.push(format!(
            "fixed type mismatch: reader '{r_name}' (size {r_size:?}) vs writer '{w_name}' (size {w_size:?})"
        ));
        false
    }
}

fn describe(v: &Value) -> String {
    kind_of(v).unwrap_or("?").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::avro;

    fn schema(s: &str) -> AvroSchema {
        avro::parse(s, &[]).unwrap()
    }

    #[test]
    fn new_field_with_default_is_backward_compatible() {
        let old = schema(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#);
        let new = schema(
            r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string","default":""}]}"#,
        );
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(ok, "{msgs:?}");
    }

    #[test]
    fn new_field_without_default_is_backward_incompatible() {
        let old = schema(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#);
        let new = schema(
            r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string"}]}"#,
        );
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(!ok);
        assert!(msgs[0].contains("email"));
    }

    #[test]
    fn int_to_long_promotion_is_compatible() {
        let old = schema(r#"{"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}"#);
        let new = schema(r#"{"type":"record","name":"R","fields":[{"name":"x","type":"long"}]}"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(ok);
    }

    #[test]
    fn long_to_int_narrowing_is_incompatible() {
        let old = schema(r#"{"type":"record","name":"R","fields":[{"name":"x","type":"long"}]}"#);
        let new = schema(r#"{"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(!ok);
    }
}
