//! Protobuf schema parsing and canonicalization.
//!
//! Schemas are compiled to a `FileDescriptorProto` with the pure-Rust parser
//! from `protobuf-parse` (no `protoc` binary required), then re-rendered with
//! messages sorted by name, fields within a message sorted by field number,
//! enums and enum values sorted (by name then by number), nested types
//! recursively normalized, services and methods sorted by name, and map
//! fields rendered as `map<K, V>`.
//!
//! Identity is by field number, not name — renaming a field or a message does
//! not change the canonical form's structure, only its cosmetic labels, which
//! is why labels are still included (for readability of diagnostics) but
//! field *order* is always number order.

use std::io::Write as _;

use protobuf::descriptor::FileDescriptorProto;

use crate::error::Error;
use crate::parser::ResolvedReference;

#[derive(Debug, Clone)]
pub struct ProtoSchema {
    pub descriptor: FileDescriptorProto,
}

pub fn parse(content: &str, references: &[ResolvedReference]) -> Result<ProtoSchema, Error> {
    let tmp = tempfile::tempdir().map_err(|e| Error::Internal(e.to_string()))?;
    let main_path = tmp.path().join("schema.proto");
    std::fs::write(&main_path, content).map_err(|e| Error::Internal(e.to_string()))?;

    for r in references {
        let dest = tmp.path().join(&r.name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Internal(e.to_string()))?;
        }
        let mut f = std::fs::File::create(&dest).map_err(|e| Error::Internal(e.to_string()))?;
        f.write_all(r.content.as_bytes())
            .map_err(|e| Error::Internal(e.to_string()))?;
    }

    let parsed = protobuf_parse::Parser::new()
        .pure()
        .includes(&[tmp.path().to_path_buf()])
        .input(&main_path)
        .parse_and_typecheck()
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") || msg.contains("import") {
                Error::UnresolvedReference {
                    name: msg,
                    subject: String::new(),
                    version: 0,
                }
            } else {
                Error::InvalidSchema(msg)
            }
        })?;

    let descriptor = parsed
        .file_descriptors
        .into_iter()
        .find(|fd| fd.name() == "schema.proto")
        .ok_or_else(|| Error::InvalidSchema("main file descriptor not produced".into()))?;

    Ok(ProtoSchema { descriptor })
}

// Wire-type numbers from google/protobuf/descriptor.proto; matched by value
// rather than the generated enum so canonicalization doesn't depend on the
// exact shape rust-protobuf exposes for `EnumOrUnknown`.
const TYPE_DOUBLE: i32 = 1;
const TYPE_FLOAT: i32 = 2;
const TYPE_MESSAGE: i32 = 11;
const TYPE_ENUM: i32 = 14;
const LABEL_REPEATED: i32 = 3;

pub fn canonicalize(schema: &ProtoSchema) -> Vec<u8> {
    let fd = &schema.descriptor;
    let mut out = String::new();
    out.push_str("syntax=");
    out.push_str(if fd.syntax() == "proto3" { "proto3" } else { "proto2" });
    out.push(';');
    out.push_str("package=");
    out.push_str(fd.package());
    out.push(';');

    let mut messages: Vec<_> = fd.message_type.iter().collect();
    messages.sort_by(|a, b| a.name().cmp(b.name()));
    for m in messages {
        render_message(m, &mut out);
    }

    let mut enums: Vec<_> = fd.enum_type.iter().collect();
    enums.sort_by(|a, b| a.name().cmp(b.name()));
    for e in enums {
        render_enum(e, &mut out);
    }

    let mut services: Vec<_> = fd.service.iter().collect();
    services.sort_by(|a, b| a.name().cmp(b.name()));
    for s in services {
        out.push_str("service ");
        out.push_str(s.name());
        out.push('{');
        let mut methods: Vec<_> = s.method.iter().collect();
        methods.sort_by(|a, b| a.name().cmp(b.name()));
        for m in methods {
            out.push_str(&format!(
                "rpc {}({}){{}}:({}){{}};",
                m.name(),
                m.input_type(),
                m.output_type()
            ));
        }
        out.push('}');
    }

    out.into_bytes()
}

fn render_message(m: &protobuf::descriptor::DescriptorProto, out: &mut String) {
    out.push_str("message ");
    out.push_str(m.name());
    out.push('{');

    let map_entry = m
        .options
        .as_ref()
        .map(|o| o.map_entry())
        .unwrap_or(false);
    if map_entry {
        out.push_str("map_entry;");
    }

    let mut fields: Vec<_> = m.field.iter().collect();
    fields.sort_by_key(|f| f.number());
    for f in fields {
        render_field(m, f, out);
    }

    let mut oneofs: Vec<_> = m.oneof_decl.iter().map(|o| o.name()).collect();
    oneofs.sort();
    for name in oneofs {
        out.push_str("oneof ");
        out.push_str(name);
        out.push(';');
    }

    let mut nested: Vec<_> = m.nested_type.iter().filter(|n| {
        !n.options.as_ref().map(|o| o.map_entry()).unwrap_or(false)
    }).collect();
    nested.sort_by(|a, b| a.name().cmp(b.name()));
    for n in nested {
        render_message(n, out);
    }

    let mut enums: Vec<_> = m.enum_type.iter().collect();
    enums.sort_by(|a, b| a.name().cmp(b.name()));
    for e in enums {
        render_enum(e, out);
    }

    out.push('}');
}

fn render_field(
    parent: &protobuf::descriptor::DescriptorProto,
    f: &protobuf::descriptor::FieldDescriptorProto,
    out: &mut String,
) {
    let type_value = f.type_().value();
    let is_map = type_value == TYPE_MESSAGE
        && f.label().value() == LABEL_REPEATED
        && parent
            .nested_type
            .iter()
            .find(|n| type_name_matches(f.type_name(), parent.name(), n.name()))
            .map(|n| n.options.as_ref().map(|o| o.map_entry()).unwrap_or(false))
            .unwrap_or(false);

    out.push_str(&format!("field({})=", f.number()));
    if is_map {
        let entry = parent
            .nested_type
            .iter()
            .find(|n| type_name_matches(f.type_name(), parent.name(), n.name()))
            .expect("map entry located above");
        let key = entry.field.iter().find(|ff| ff.name() == "key");
        let value = entry.field.iter().find(|ff| ff.name() == "value");
        let key_ty = key.map(field_type_label).unwrap_or_else(|| "string".into());
        let val_ty = value
            .map(field_type_label)
            .unwrap_or_else(|| "string".into());
        out.push_str(&format!("map<{key_ty}, {val_ty}>"));
    } else {
        out.push_str(&field_type_label(f));
        if f.label().value() == LABEL_REPEATED {
            out.push_str("[]");
        }
    }
    out.push(':');
    out.push_str(f.name());
    if let Some(idx) = f.oneof_index {
        out.push_str(&format!(":oneof{idx}"));
    }
    out.push(';');
}

fn field_type_label(f: &protobuf::descriptor::FieldDescriptorProto) -> String {
    let t = f.type_().value();
    if t == TYPE_MESSAGE || t == TYPE_ENUM {
        f.type_name().trim_start_matches('.').to_string()
    } else {
        proto_type_name(t).to_string()
    }
}

fn proto_type_name(type_value: i32) -> &'static str {
    match type_value {
        TYPE_DOUBLE => "double",
        TYPE_FLOAT => "float",
        3 => "int64",
        4 => "uint64",
        5 => "int32",
        6 => "fixed64",
        7 => "fixed32",
        8 => "bool",
        9 => "string",
        12 => "bytes",
        13 => "uint32",
        15 => "sfixed32",
        16 => "sfixed64",
        17 => "sint32",
        18 => "sint64",
        _ => "unknown",
    }
}

fn type_name_matches(full_type_name: &str, parent_name: &str, nested_name: &str) -> bool {
    let suffix = format!("{parent_name}.{nested_name}");
    full_type_name.trim_start_matches('.').ends_with(&suffix)
}

fn render_enum(e: &protobuf::descriptor::EnumDescriptorProto, out: &mut String) {
    out.push_str("enum ");
    out.push_str(e.name());
    out.push('{');
    let mut values: Vec<_> = e.value.iter().collect();
    values.sort_by(|a, b| a.name().cmp(b.name()).then(a.number().cmp(&b.number())));
    for v in values {
        out.push_str(&format!("{}={};", v.name(), v.number()));
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_message() {
        let schema = parse(
            r#"syntax = "proto3";
            message Event { int32 id = 1; string name = 2; }"#,
            &[],
        )
        .unwrap();
        let canon = String::from_utf8(canonicalize(&schema)).unwrap();
        assert!(canon.contains("message Event"));
        assert!(canon.contains("field(1)=int32:id;"));
        assert!(canon.contains("field(2)=string:name;"));
    }

    #[test]
    fn field_order_follows_number_not_declaration() {
        let schema = parse(
            r#"syntax = "proto3";
            message Event { string name = 2; int32 id = 1; }"#,
            &[],
        )
        .unwrap();
        let canon = String::from_utf8(canonicalize(&schema)).unwrap();
        let id_pos = canon.find("field(1)").unwrap();
        let name_pos = canon.find("field(2)").unwrap();
        assert!(id_pos < name_pos);
    }
}
