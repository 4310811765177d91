//! Avro schema parsing and canonicalization.
//!
//! Canonical form orders each node's keys as `name, type,
//! fields|symbols|items|values|size`, strips `doc`/`aliases`/`order`, and
//! **keeps `default`** — two schemas differing only in a field default are
//! distinct for dedup purposes. This is a deliberate divergence from the
//! Apache Avro "Parsing Canonical Form", which strips defaults; see
//! DESIGN.md.
//!
//! Named-type references are resolved by inlining the referenced
//! definition at its first occurrence and referring to it by fully
//! qualified name thereafter, matching how a single Avro document handles a
//! type used in more than one field.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::Error;
use crate::parser::ResolvedReference;

const PRIMITIVES: &[&str] = &[
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

#[derive(Debug, Clone)]
pub struct AvroSchema {
    /// The schema tree after reference resolution, ready to canonicalize.
    pub resolved: Value,
}

pub fn parse(content: &str, references: &[ResolvedReference]) -> Result<AvroSchema, Error> {
    let raw: Value = serde_json::from_str(content)
        .map_err(|e| Error::InvalidSchema(format!("invalid JSON: {e}")))?;

    let mut ref_table: HashMap<String, Value> = HashMap::new();
    for r in references {
        let parsed: Value = serde_json::from_str(&r.content)
            .map_err(|e| Error::InvalidSchema(format!("invalid reference JSON: {e}")))?;
        index_named_types(&parsed, "", &mut ref_table);
        // The reference's declared name is also a valid handle even if it
        // doesn't match a name found inside the document (e.g. aliasing).
        ref_table.entry(r.name.clone()).or_insert(parsed);
    }

    let mut defined = HashSet::new();
    let resolved = resolve(&raw, "", &ref_table, &mut defined)?;

    validate_semantics(&resolved)?;

    // Defer to apache-avro for the semantic rules our own walk doesn't
    // re-implement (logical type combinations, union-of-union rejection,
    // name syntax, ...). It operates on the fully resolved tree so
    // cross-reference type names are never a false failure here.
    let resolved_text = resolved.to_string();
    apache_avro::Schema::parse_str(&resolved_text)
        .map_err(|e| Error::InvalidSchema(format!("{e}")))?;

    Ok(AvroSchema { resolved })
}

/// Walks a parsed Avro document collecting every named type's fully
/// qualified name so it can be looked up when referenced from elsewhere.
pub(crate) fn index_named_types(value: &Value, enclosing_ns: &str, out: &mut HashMap<String, Value>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(t)) = map.get("type") {
                if matches!(t.as_str(), "record" | "error" | "enum" | "fixed") {
                    let ns = map
                        .get("namespace")
                        .and_then(|v| v.as_str())
                        .unwrap_or(enclosing_ns);
                    if let Some(name) = map.get("name").and_then(|v| v.as_str()) {
                        let fullname = fullname(name, ns);
                        out.insert(fullname, value.clone());
                    }
                    if t == "record" || t == "error" {
                        if let Some(Value::Array(fields)) = map.get("fields") {
                            for field in fields {
                                if let Some(field_type) = field.get("type") {
                                    index_named_types(field_type, ns, out);
                                }
                            }
                        }
                    }
                } else if t == "array" {
                    if let Some(items) = map.get("items") {
                        index_named_types(items, enclosing_ns, out);
                    }
                } else if t == "map" {
                    if let Some(values) = map.get("values") {
                        index_named_types(values, enclosing_ns, out);
                    }
                }
            }
        }
        Value::Array(branches) => {
            for b in branches {
                index_named_types(b, enclosing_ns, out);
            }
        }
        _ => {}
    }
}

pub(crate) fn fullname(name: &str, namespace: &str) -> String {
    if name.contains('.') || namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Resolves bare name references against `ref_table`, inlining the first
/// occurrence and leaving the bare name for subsequent occurrences.
fn resolve(
    value: &Value,
    enclosing_ns: &str,
    ref_table: &HashMap<String, Value>,
    defined: &mut HashSet<String>,
) -> Result<Value, Error> {
    match value {
        Value::String(name) => {
            if PRIMITIVES.contains(&name.as_str()) {
                return Ok(value.clone());
            }
            let qualified = fullname(name, enclosing_ns);
            if defined.contains(&qualified) || defined.contains(name.as_str()) {
                return Ok(value.clone());
            }
            if let Some(def) = ref_table
                .get(&qualified)
                .or_else(|| ref_table.get(name.as_str()))
            {
                defined.insert(qualified);
                return resolve(def, enclosing_ns, ref_table, defined);
            }
            Err(Error::UnresolvedReference {
                name: name.clone(),
                subject: String::new(),
                version: 0,
            })
        }
        Value::Array(branches) => {
            let mut out = Vec::with_capacity(branches.len());
            for b in branches {
                out.push(resolve(b, enclosing_ns, ref_table, defined)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = map.clone();
            let is_named = matches!(
                map.get("type").and_then(|v| v.as_str()),
                Some("record") | Some("error") | Some("enum") | Some("fixed")
            );
            let ns = map
                .get("namespace")
                .and_then(|v| v.as_str())
                .unwrap_or(enclosing_ns)
                .to_owned();
            if is_named {
                if let Some(name) = map.get("name").and_then(|v| v.as_str()) {
                    defined.insert(fullname(name, &ns));
                }
            }
            if let Some(Value::Array(fields)) = map.get("fields") {
                let mut resolved_fields = Vec::with_capacity(fields.len());
                for field in fields {
                    let mut field_map = field
                        .as_object()
                        .cloned()
                        .ok_or_else(|| Error::InvalidSchema("field must be an object".into()))?;
                    if let Some(field_type) = field.get("type") {
                        let resolved_type = resolve(field_type, &ns, ref_table, defined)?;
                        field_map.insert("type".to_string(), resolved_type);
                    }
                    resolved_fields.push(Value::Object(field_map));
                }
                out.insert("fields".to_string(), Value::Array(resolved_fields));
            }
            if let Some(items) = map.get("items") {
                out.insert("items".to_string(), resolve(items, &ns, ref_table, defined)?);
            }
            if let Some(values) = map.get("values") {
                out.insert(
                    "values".to_string(),
                    resolve(values, &ns, ref_table, defined)?,
                );
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Minimal semantic validation: every named type has a name, records have a
/// `fields` array, enums a `symbols` array, fixed a numeric `size`.
fn validate_semantics(value: &Value) -> Result<(), Error> {
    match value {
        Value::Object(map) => {
            if let Some(t) = map.get("type").and_then(|v| v.as_str()) {
                match t {
                    "record" | "error" => {
                        if map.get("name").and_then(|v| v.as_str()).is_none() {
                            return Err(Error::InvalidSchema(format!("{t} missing 'name'")));
                        }
                        let fields = map.get("fields").and_then(|v| v.as_array()).ok_or_else(
                            || Error::InvalidSchema(format!("{t} missing 'fields' array")),
                        )?;
                        let mut seen = HashSet::new();
                        for f in fields {
                            let fname = f
                                .get("name")
                                .and_then(|v| v.as_str())
                                .ok_or_else(|| Error::InvalidSchema("field missing 'name'".into()))?;
                            if !seen.insert(fname.to_owned()) {
                                return Err(Error::InvalidSchema(format!(
                                    "duplicate field name '{fname}'"
                                )));
                            }
                            let ftype = f.get("type").ok_or_else(|| {
                                Error::InvalidSchema(format!("field '{fname}' missing 'type'"))
                            })?;
                            validate_semantics(ftype)?;
                        }
                    }
                    "enum" => {
                        if map.get("name").and_then(|v| v.as_str()).is_none() {
                            return Err(Error::InvalidSchema("enum missing 'name'".into()));
                        }
                        map.get("symbols")
                            .and_then(|v| v.as_array())
                            .ok_or_else(|| Error::InvalidSchema("enum missing 'symbols'".into()))?;
                    }
                    "fixed" => {
                        if map.get("name").and_then(|v| v.as_str()).is_none() {
                            return Err(Error::InvalidSchema("fixed missing 'name'".into()));
                        }
                        if !matches!(map.get("size"), Some(Value::Number(_))) {
                            return Err(Error::InvalidSchema("fixed missing 'size'".into()));
                        }
                    }
                    "array" => {
                        let items = map
                            .get("items")
                            .ok_or_else(|| Error::InvalidSchema("array missing 'items'".into()))?;
                        validate_semantics(items)?;
                    }
                    "map" => {
                        let values = map
                            .get("values")
                            .ok_or_else(|| Error::InvalidSchema("map missing 'values'".into()))?;
                        validate_semantics(values)?;
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        Value::Array(branches) => {
            for b in branches {
                validate_semantics(b)?;
            }
            Ok(())
        }
        Value::String(_) => Ok(()),
        _ => Err(Error::InvalidSchema("unexpected schema node".into())),
    }
}

pub fn canonicalize(schema: &AvroSchema) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(&schema.resolved, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push('"');
            out.push_str(&escape(s));
            out.push('"');
        }
        Value::Array(branches) => {
            out.push('[');
            for (i, b) in branches.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(b, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let kind = map.get("type").and_then(|v| v.as_str()).unwrap_or("");
            out.push('{');
            let mut first = true;
            let mut write_kv = |key: &str, val: &Value, out: &mut String| {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push('"');
                out.push_str(key);
                out.push_str("\":");
                write_canonical(val, out);
            };
            if let Some(name) = map.get("name") {
                let ns = map.get("namespace").and_then(|v| v.as_str()).unwrap_or("");
                let full = match name.as_str() {
                    Some(n) => Value::String(fullname(n, ns)),
                    None => name.clone(),
                };
                write_kv("name", &full, out);
            }
            if let Some(t) = map.get("type") {
                write_kv("type", t, out);
            }
            match kind {
                "record" | "error" => {
                    if let Some(fields) = map.get("fields") {
                        write_kv("fields", fields, out);
                    }
                }
                "enum" => {
                    if let Some(symbols) = map.get("symbols") {
                        write_kv("symbols", symbols, out);
                    }
                    if let Some(default) = map.get("default") {
                        write_kv("default", default, out);
                    }
                }
                "array" => {
                    if let Some(items) = map.get("items") {
                        write_kv("items", items, out);
                    }
                }
                "map" => {
                    if let Some(values) = map.get("values") {
                        write_kv("values", values, out);
                    }
                }
                "fixed" => {
                    if let Some(size) = map.get("size") {
                        write_kv("size", size, out);
                    }
                }
                _ => {}
            }
            // Remaining attributes (logicalType, precision, scale, field
            // defaults, etc.) in sorted key order, skipping everything we've
            // already emitted and the stripped doc/aliases/order triplet.
            let handled = [
                "name", "namespace", "type", "fields", "symbols", "items", "values", "size",
                "doc", "aliases", "order",
            ];
            let mut rest: Vec<(&String, &Value)> =
                map.iter().filter(|(k, _)| !handled.contains(&k.as_str())).collect();
            rest.sort_by(|a, b| a.0.cmp(b.0));
            for (k, v) in rest {
                write_kv(k, v, out);
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(s: &str) -> AvroSchema {
        parse(s, &[]).unwrap()
    }

    #[test]
    fn strips_doc_aliases_order_but_keeps_default() {
        let schema = parse_str(
            r#"{"type":"record","name":"User","doc":"a user","fields":[
                {"name":"id","type":"long","order":"ascending"},
                {"name":"email","type":"string","default":"","aliases":["mail"]}
            ]}"#,
        );
        let canon = String::from_utf8(canonicalize(&schema)).unwrap();
        assert!(!canon.contains("doc"));
        assert!(!canon.contains("aliases"));
        assert!(!canon.contains("ascending"));
        assert!(canon.contains("\"default\":\"\""));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let schema = parse_str(r#"{"type":"record","name":"ns.User","fields":[{"name":"id","type":"long"}]}"#);
        let first = canonicalize(&schema);
        let reparsed = parse(&String::from_utf8(first.clone()).unwrap(), &[]).unwrap();
        let second = canonicalize(&reparsed);
        assert_eq!(first, second);
    }

    #[test]
    fn resolves_named_reference() {
        let address = ResolvedReference {
            name: "ns.Address".to_string(),
            subject: "address-value".to_string(),
            version: 1,
            schema_type: crate::model::SchemaType::Avro,
            content: r#"{"type":"record","name":"Address","namespace":"ns","fields":[{"name":"city","type":"string"}]}"#
                .to_string(),
        };
        let schema = parse(
            r#"{"type":"record","name":"ns.User","fields":[{"name":"home","type":"ns.Address"}]}"#,
            &[address],
        )
        .unwrap();
        let canon = String::from_utf8(canonicalize(&schema)).unwrap();
        assert!(canon.contains("\"city\""));
    }

    #[test]
    fn missing_reference_is_an_error() {
        let err = parse(
            r#"{"type":"record","name":"User","fields":[{"name":"home","type":"ns.Address"}]}"#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let err = parse(
            r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"id","type":"string"}]}"#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }
}
