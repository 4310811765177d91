//! JSON Schema reader/writer compatibility.
//!
//! `is_compatible(reader, writer)` holds when every instance the writer
//! schema accepts is also accepted by the reader schema — that's "backward"
//! when `reader` is the candidate and `writer` is the existing version, and
//! "forward" when the orchestration swaps the arguments.
//!
//! This walks the keyword set named in the specification. `allOf` is handled
//! by a shallow structural merge rather than true schema intersection, and
//! `pattern`/`not` are compared structurally rather than via regex-language
//! containment — both are pragmatic approximations of keywords that don't
//! have a tractable exact subset check.

use serde_json::{Map, Value};

use crate::parser::json_schema::JsonSchemaDoc;

pub fn is_compatible(reader: &JsonSchemaDoc, writer: &JsonSchemaDoc) -> (bool, Vec<String>) {
    let mut messages = Vec::new();
    let ok = accepts(&reader.value, &writer.value, reader, writer, &mut messages, "$");
    (messages.is_empty(), messages)
}

fn deref<'a>(v: &'a Value, doc: &'a JsonSchemaDoc) -> &'a Value {
    let mut cur = v;
    for _ in 0..16 {
        let Some(r) = cur.get("$ref").and_then(|x| x.as_str()) else {
            break;
        };
        let next = if let Some(rest) = r.strip_prefix("#/") {
            let mut node = &doc.value;
            for seg in rest.split('/') {
                node = node.get(seg).unwrap_or(&Value::Null);
            }
            node
        } else if let Some(target) = doc.references.get(r) {
            target
        } else {
            break;
        };
        if std::ptr::eq(next, cur) {
            break;
        }
        cur = next;
    }
    cur
}

/// Shallow `allOf` merge: unions `properties`/`required`, keeps the first
/// explicit `type`/`additionalProperties` found. Good enough for the common
/// "extend this base schema" pattern; not a full schema intersection.
fn merge_all_of(v: &Value) -> Value {
    let Some(Value::Array(parts)) = v.get("allOf") else {
        return v.clone();
    };
    let mut merged = v.as_object().cloned().unwrap_or_default();
    merged.remove("allOf");
    let mut properties = merged
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    let mut required: Vec<Value> = merged
        .get("required")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    for part in parts {
        let part = merge_all_of(part);
        if let Some(obj) = part.as_object() {
            if let Some(Value::Object(props)) = obj.get("properties") {
                for (k, v) in props {
                    properties.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            if let Some(Value::Array(req)) = obj.get("required") {
                for r in req {
                    if !required.contains(r) {
                        required.push(r.clone());
                    }
                }
            }
            if !merged.contains_key("type") {
                if let Some(t) = obj.get("type") {
                    merged.insert("type".to_string(), t.clone());
                }
            }
            if !merged.contains_key("additionalProperties") {
                if let Some(ap) = obj.get("additionalProperties") {
                    merged.insert("additionalProperties".to_string(), ap.clone());
                }
            }
        }
    }
    if !properties.is_empty() {
        merged.insert("properties".to_string(), Value::Object(properties));
    }
    if !required.is_empty() {
        merged.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(merged)
}

fn type_set(v: &Value) -> Option<Vec<String>> {
    match v.get("type") {
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(Value::Array(a)) => Some(a.iter().filter_map(|x| x.as_str().map(String::from)).collect()),
        _ => None,
    }
}

fn type_accepts(reader_types: &[String], writer_type: &str) -> bool {
    reader_types.iter().any(|rt| {
        rt == writer_type || (rt == "number" && writer_type == "integer")
    })
}

fn num(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(|x| x.as_f64())
}

fn accepts(
    reader: &Value,
    writer: &Value,
    reader_doc: &JsonSchemaDoc,
    writer_doc: &JsonSchemaDoc,
    messages: &mut Vec<String>,
    path: &str,
) -> bool {
    let reader = deref(reader, reader_doc);
    let writer = deref(writer, writer_doc);

    if writer == &Value::Bool(false) {
        return true; // writer accepts nothing: vacuously compatible
    }
    if reader == &Value::Bool(true) {
        return true; // reader accepts everything
    }
    if reader == &Value::Bool(false) {
        messages.push(format!("{path}: reader rejects everything but writer is not always-false"));
        return false;
    }
    if writer == &Value::Bool(true) && reader != &Value::Bool(true) {
        messages.push(format!("{path}: writer accepts any value but reader narrows the schema"));
        return false;
    }

    let reader_merged = merge_all_of(reader);
    let writer_merged = merge_all_of(writer);
    let reader = &reader_merged;
    let writer = &writer_merged;

    let mut ok = true;

    // oneOf/anyOf: every writer branch must be covered by some reader branch
    // (falling back to the reader document itself if it has none).
    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(writer_branches)) = writer.get(key) {
            let reader_branches = match reader.get(key) {
                Some(Value::Array(b)) => b.clone(),
                _ => vec![reader.clone()],
            };
            for wb in writer_branches {
                let matched = reader_branches
                    .iter()
                    .any(|rb| accepts_quiet(rb, wb, reader_doc, writer_doc));
                if !matched {
                    messages.push(format!("{path}.{key}: a writer branch has no compatible reader branch"));
                    ok = false;
                }
            }
        }
    }

    if let (Some(rtypes), Some(wtypes)) = (type_set(reader), type_set(writer)) {
        for wt in &wtypes {
            if !type_accepts(&rtypes, wt) {
                messages.push(format!("{path}: writer type '{wt}' not accepted by reader type(s) {rtypes:?}"));
                ok = false;
            }
        }
    } else if type_set(reader).is_some() && type_set(writer).is_none() {
        messages.push(format!("{path}: reader requires a type but writer does not constrain it"));
        ok = false;
    }

    // enum / const
    let reader_enum = reader.get("enum").and_then(|e| e.as_array());
    let writer_enum = writer.get("enum").and_then(|e| e.as_array()).cloned().or_else(|| {
        writer.get("const").map(|c| vec![c.clone()])
    });
    if let Some(renum) = reader_enum {
        match writer_enum {
            Some(wvals) => {
                for wv in &wvals {
                    if !renum.contains(wv) {
                        messages.push(format!("{path}: writer enum/const value {wv} is not in reader enum"));
                        ok = false;
                    }
                }
            }
            None => {
                messages.push(format!("{path}: reader restricts to an enum writer does not constrain to"));
                ok = false;
            }
        }
    }

    // numeric bounds
    if let Some(rmin) = num(reader, "minimum") {
        let wmin = num(writer, "minimum").unwrap_or(f64::NEG_INFINITY);
        if rmin > wmin {
            messages.push(format!("{path}: reader minimum {rmin} is stricter than writer minimum {wmin}"));
            ok = false;
        }
    }
    if let Some(rmax) = num(reader, "maximum") {
        let wmax = num(writer, "maximum").unwrap_or(f64::INFINITY);
        if rmax < wmax {
            messages.push(format!("{path}: reader maximum {rmax} is stricter than writer maximum {wmax}"));
            ok = false;
        }
    }
    for key in ["exclusiveMinimum", "exclusiveMaximum"] {
        if let (Some(r), Some(w)) = (num(reader, key), num(writer, key)) {
            let tightened = if key == "exclusiveMinimum" { r > w } else { r < w };
            if tightened {
                messages.push(format!("{path}: reader {key} {r} is stricter than writer {key} {w}"));
                ok = false;
            }
        } else if num(reader, key).is_some() && num(writer, key).is_none() {
            messages.push(format!("{path}: reader adds {key} writer did not have"));
            ok = false;
        }
    }
    if let Some(rmul) = num(reader, "multipleOf") {
        match num(writer, "multipleOf") {
            Some(wmul) if (wmul % rmul).abs() < 1e-9 => {}
            _ => {
                messages.push(format!("{path}: reader multipleOf {rmul} is not guaranteed by writer"));
                ok = false;
            }
        }
    }

    // string length / pattern
    if let Some(rmin) = num(reader, "minLength") {
        let wmin = num(writer, "minLength").unwrap_or(0.0);
        if rmin > wmin {
            messages.push(format!("{path}: reader minLength {rmin} is stricter than writer minLength {wmin}"));
            ok = false;
        }
    }
    if let Some(rmax) = num(reader, "maxLength") {
        let wmax = num(writer, "maxLength").unwrap_or(f64::INFINITY);
        if rmax < wmax {
            messages.push(format!("{path}: reader maxLength {rmax} is stricter than writer maxLength {wmax}"));
            ok = false;
        }
    }
    if let Some(rpat) = reader.get("pattern").and_then(|v| v.as_str()) {
        if writer.get("pattern").and_then(|v| v.as_str()) != Some(rpat) {
            messages.push(format!("{path}: reader pattern '{rpat}' is not guaranteed by writer"));
            ok = false;
        }
    }

    // object keywords
    let reader_props = reader.get("properties").and_then(|p| p.as_object());
    let writer_props = writer.get("properties").and_then(|p| p.as_object());
    if let (Some(rp), Some(wp)) = (reader_props, writer_props) {
        for (name, rschema) in rp {
            if let Some(wschema) = wp.get(name) {
                if !accepts(rschema, wschema, reader_doc, writer_doc, messages, &format!("{path}.properties.{name}")) {
                    ok = false;
                }
            }
        }
    }
    let reader_additional = reader.get("additionalProperties");
    let reader_closed = reader_additional == Some(&Value::Bool(false));
    if reader_closed {
        if let Some(wp) = writer_props {
            let empty = Map::new();
            let rp = reader_props.unwrap_or(&empty);
            for name in wp.keys() {
                if !rp.contains_key(name) {
                    messages.push(format!(
                        "{path}: writer property '{name}' is not allowed by reader's additionalProperties:false"
                    ));
                    ok = false;
                }
            }
        }
        let writer_closed = writer.get("additionalProperties") == Some(&Value::Bool(false));
        if !writer_closed {
            // Writer's content model is open (no additionalProperties:false),
            // regardless of what properties it happens to declare today — it
            // can always emit one more the closed reader will reject.
            messages.push(format!(
                "{path}: reader closes additionalProperties but writer's content model is open"
            ));
            ok = false;
        }
    }

    let reader_required: Vec<&str> = reader
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let writer_required: Vec<&str> = writer
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    for name in &reader_required {
        if !writer_required.contains(name) {
            messages.push(format!(
                "{path}: reader requires property '{name}' which writer did not require"
            ));
            ok = false;
        }
    }

    for key in ["minProperties", "minItems"] {
        if let Some(r) = num(reader, key) {
            let w = num(writer, key).unwrap_or(0.0);
            if r > w {
                messages.push(format!("{path}: reader {key} {r} is stricter than writer {key} {w}"));
                ok = false;
            }
        }
    }
    for key in ["maxProperties", "maxItems"] {
        if let Some(r) = num(reader, key) {
            let w = num(writer, key).unwrap_or(f64::INFINITY);
            if r < w {
                messages.push(format!("{path}: reader {key} {r} is stricter than writer {key} {w}"));
                ok = false;
            }
        }
    }
    if reader.get("uniqueItems") == Some(&Value::Bool(true))
        && writer.get("uniqueItems") != Some(&Value::Bool(true))
    {
        messages.push(format!("{path}: reader requires uniqueItems but writer does not"));
        ok = false;
    }

    // array items / prefixItems
    if let (Some(ri), Some(wi)) = (reader.get("items"), writer.get("items")) {
        if !ri.is_object() || !wi.is_object() {
            // boolean items schemas handled by the accepts() boolean path
        }
        if !accepts(ri, wi, reader_doc, writer_doc, messages, &format!("{path}.items")) {
            ok = false;
        }
    }
    if let (Some(Value::Array(rp)), Some(Value::Array(wp))) =
        (reader.get("prefixItems"), writer.get("prefixItems"))
    {
        for (i, (r, w)) in rp.iter().zip(wp.iter()).enumerate() {
            if !accepts(r, w, reader_doc, writer_doc, messages, &format!("{path}.prefixItems[{i}]")) {
                ok = false;
            }
        }
        if wp.len() > rp.len() {
            let reader_additional_items_open =
                !matches!(reader.get("additionalItems"), Some(Value::Bool(false)));
            if !reader_additional_items_open {
                messages.push(format!(
                    "{path}: writer has more tuple positions than reader allows via additionalItems:false"
                ));
                ok = false;
            }
        }
    }

    // dependentRequired (2020-12) / dependencies (draft-07, required-list form)
    let reader_dep_req = reader
        .get("dependentRequired")
        .or_else(|| reader.get("dependencies"))
        .and_then(|v| v.as_object());
    if let Some(rdeps) = reader_dep_req {
        let writer_deps = writer
            .get("dependentRequired")
            .or_else(|| writer.get("dependencies"))
            .and_then(|v| v.as_object());
        for (trigger, required) in rdeps {
            let Some(required) = required.as_array() else { continue };
            let writer_required_for_trigger: Vec<&str> = writer_deps
                .and_then(|wd| wd.get(trigger))
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str()).collect())
                .unwrap_or_default();
            for req in required {
                if let Some(req) = req.as_str() {
                    if !writer_required_for_trigger.contains(&req) {
                        messages.push(format!(
                            "{path}: reader requires '{req}' when '{trigger}' is present, writer does not"
                        ));
                        ok = false;
                    }
                }
            }
        }
    }

    ok
}

fn accepts_quiet(reader: &Value, writer: &Value, reader_doc: &JsonSchemaDoc, writer_doc: &JsonSchemaDoc) -> bool {
    let mut throwaway = Vec::new();
    accepts(reader, writer, reader_doc, writer_doc, &mut throwaway, "$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::json_schema::parse;

    fn doc(s: &str) -> JsonSchemaDoc {
        parse(s, &[]).unwrap()
    }

    #[test]
    fn adding_optional_property_is_backward_compatible() {
        let old = doc(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let new = doc(r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}}}"#);
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(ok, "{msgs:?}");
    }

    #[test]
    fn adding_required_property_is_backward_incompatible() {
        let old = doc(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let new = doc(r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}},"required":["name"]}"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(!ok);
    }

    #[test]
    fn integer_to_number_widening_is_compatible() {
        let old = doc(r#"{"type":"integer"}"#);
        let new = doc(r#"{"type":"number"}"#);
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(ok, "{msgs:?}");
    }

    #[test]
    fn closing_additional_properties_is_incompatible() {
        let old = doc(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let new = doc(r#"{"type":"object","properties":{"id":{"type":"integer"}},"additionalProperties":false}"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(!ok);
    }
}
