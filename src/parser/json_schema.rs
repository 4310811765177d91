//! JSON Schema parsing and canonicalization (Draft-07 and Draft 2020-12).
//!
//! Canonical form recursively sorts object keys lexicographically, normalizes
//! integer-valued numbers (dropping a trailing `.0`), and strips insignificant
//! whitespace. Local `$ref`s into `#/definitions` or `#/$defs` are left as-is
//! in the canonical form (they're dereferenced at compatibility-check time,
//! not baked into dedup identity); cross-subject `$ref` URIs are resolved via
//! the reference table the caller supplies.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::error::Error;
use crate::parser::ResolvedReference;

#[derive(Debug, Clone)]
pub struct JsonSchemaDoc {
    pub value: Value,
    /// Cross-subject `$ref` targets, keyed by the URI used to refer to them.
    pub references: BTreeMap<String, Value>,
}

pub fn parse(content: &str, references: &[ResolvedReference]) -> Result<JsonSchemaDoc, Error> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| Error::InvalidSchema(format!("invalid JSON: {e}")))?;

    if !value.is_object() && !value.is_boolean() {
        return Err(Error::InvalidSchema(
            "a JSON Schema document must be an object or boolean".into(),
        ));
    }

    let mut ref_table = BTreeMap::new();
    for r in references {
        let parsed: Value = serde_json::from_str(&r.content)
            .map_err(|e| Error::InvalidSchema(format!("invalid reference JSON: {e}")))?;
        ref_table.insert(r.name.clone(), parsed);
    }

    // Verify every non-local $ref used in the document resolves, and that the
    // document is a schema `jsonschema` can compile a validator for (this is
    // also where Draft-07 vs 2020-12 dialect detection happens internally).
    check_refs_resolve(&value, &ref_table)?;
    jsonschema::validator_for(&value)
        .map_err(|e| Error::InvalidSchema(format!("invalid JSON Schema: {e}")))?;

    Ok(JsonSchemaDoc {
        value,
        references: ref_table,
    })
}

fn check_refs_resolve(value: &Value, ref_table: &BTreeMap<String, Value>) -> Result<(), Error> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get("$ref") {
                if !r.starts_with('#') && !ref_table.contains_key(r) {
                    return Err(Error::UnresolvedReference {
                        name: r.clone(),
                        subject: String::new(),
                        version: 0,
                    });
                }
            }
            for v in map.values() {
                check_refs_resolve(v, ref_table)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                check_refs_resolve(v, ref_table)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn canonicalize(schema: &JsonSchemaDoc) -> Vec<u8> {
    let normalized = normalize(&schema.value);
    let mut out = String::new();
    write_canonical(&normalized, &mut out);
    out.into_bytes()
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
            return Number::from(f as i64);
        }
    }
    n.clone()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(&k.replace('\\', "\\\\").replace('"', "\\\""));
                out.push_str("\":");
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        Value::String(s) => {
            out.push('"');
            out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_keys_and_normalizes_numbers() {
        let doc = parse(r#"{"type":"number","maximum":10.0,"minimum":1}"#, &[]).unwrap();
        let canon = String::from_utf8(canonicalize(&doc)).unwrap();
        assert_eq!(canon, r#"{"maximum":10,"minimum":1,"type":"number"}"#);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let doc = parse(r#"{"type":"object","properties":{"b":{"type":"string"},"a":{"type":"integer"}}}"#, &[]).unwrap();
        let first = canonicalize(&doc);
        let reparsed = parse(&String::from_utf8(first.clone()).unwrap(), &[]).unwrap();
        let second = canonicalize(&reparsed);
        assert_eq!(first, second);
    }

    #[test]
    fn unresolved_cross_subject_ref_is_an_error() {
        let err = parse(r#"{"$ref":"https://example.com/other.json"}"#, &[]).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }
}
