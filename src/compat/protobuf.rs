//! Protobuf reader/writer compatibility.
//!
//! Field identity is by number, never by name, so renaming a field is always
//! compatible and changing its number is treated as removing one field and
//! adding another. Messages are matched across versions by fully-qualified
//! name (nested types walk the same path on both sides). Services are
//! ignored entirely — they carry no wire-format identity.

use protobuf::descriptor::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

use crate::parser::protobuf::ProtoSchema;

const TYPE_MESSAGE: i32 = 11;
const TYPE_GROUP: i32 = 10;
const LABEL_OPTIONAL: i32 = 1;
const LABEL_REQUIRED: i32 = 2;
const LABEL_REPEATED: i32 = 3;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum WireGroup {
    Varint,
    Fixed64,
    Fixed32,
    LengthDelimited,
}

fn wire_group(type_value: i32) -> WireGroup {
    match type_value {
        1 | 6 | 16 => WireGroup::Fixed64,  // double, fixed64, sfixed64
        2 | 7 | 15 => WireGroup::Fixed32,  // float, fixed32, sfixed32
        3 | 4 | 5 | 8 | 13 | 14 | 17 | 18 => WireGroup::Varint,
        9 | 12 | TYPE_MESSAGE | TYPE_GROUP => WireGroup::LengthDelimited,
        _ => WireGroup::LengthDelimited,
    }
}

pub fn is_compatible(reader: &ProtoSchema, writer: &ProtoSchema) -> (bool, Vec<String>) {
    let mut messages = Vec::new();
    check_file(&reader.descriptor, &writer.descriptor, &mut messages);
    (messages.is_empty(), messages)
}

fn check_file(reader: &FileDescriptorProto, writer: &FileDescriptorProto, messages: &mut Vec<String>) {
    for wm in &writer.message_type {
        match reader.message_type.iter().find(|rm| rm.name() == wm.name()) {
            Some(rm) => check_message(rm, wm, messages),
            None => messages.push(format!("message '{}' present in writer is missing from reader", wm.name())),
        }
    }
}

fn check_message(reader: &DescriptorProto, writer: &DescriptorProto, messages: &mut Vec<String>) {
    let path = reader.name();

    for wf in &writer.field {
        let rf = reader.field.iter().find(|f| f.number() == wf.number());
        match rf {
            None => {
                if is_in_oneof(wf) {
                    messages.push(format!(
                        "{path}: oneof field '{}' (number {}) was removed",
                        wf.name(),
                        wf.number()
                    ));
                }
                // Removing a plain field is otherwise wire-compatible: old
                // writers' values for that number are simply unknown fields
                // to new readers.
            }
            Some(rf) => {
                let rg = wire_group(rf.type_().value());
                let wg = wire_group(wf.type_().value());
                if rg != wg {
                    messages.push(format!(
                        "{path}: field '{}' (number {}) changed wire type group ({:?} -> {:?})",
                        wf.name(),
                        wf.number(),
                        wg,
                        rg
                    ));
                }

                let r_repeated = rf.label().value() == LABEL_REPEATED;
                let w_repeated = wf.label().value() == LABEL_REPEATED;
                if r_repeated != w_repeated {
                    messages.push(format!(
                        "{path}: field '{}' (number {}) changed cardinality (repeated: {} -> {})",
                        wf.name(),
                        wf.number(),
                        w_repeated,
                        r_repeated
                    ));
                }

                let r_oneof = oneof_name(reader, rf);
                let w_oneof = oneof_name(writer, wf);
                if r_oneof != w_oneof {
                    messages.push(format!(
                        "{path}: field '{}' (number {}) moved between oneofs ({:?} -> {:?})",
                        wf.name(),
                        wf.number(),
                        w_oneof,
                        r_oneof
                    ));
                }

                if rf.type_().value() == TYPE_MESSAGE || rf.type_().value() == TYPE_GROUP {
                    let rm = reader
                        .nested_type
                        .iter()
                        .find(|n| n.name() == short_type_name(rf.type_name()));
                    let wm = writer
                        .nested_type
                        .iter()
                        .find(|n| n.name() == short_type_name(wf.type_name()));
                    if let (Some(rm), Some(wm)) = (rm, wm) {
                        check_message(rm, wm, messages);
                    }
                }
            }
        }
    }

    for rf in &reader.field {
        if rf.label().value() == LABEL_REQUIRED && !writer.field.iter().any(|wf| wf.number() == rf.number()) {
            messages.push(format!(
                "{path}: reader adds required field '{}' (number {}) not present in writer",
                rf.name(),
                rf.number()
            ));
        }
    }
    for rf in &reader.field {
        if rf.label().value() != LABEL_REQUIRED {
            continue;
        }
        if let Some(wf) = writer.field.iter().find(|wf| wf.number() == rf.number()) {
            if wf.label().value() != LABEL_REQUIRED {
                messages.push(format!(
                    "{path}: field '{}' (number {}) became required but writer had it optional",
                    rf.name(),
                    rf.number()
                ));
            }
        }
    }

    let _ = LABEL_OPTIONAL;

    for wn in &writer.nested_type {
        if writer
            .field
            .iter()
            .any(|f| short_type_name(f.type_name()) == wn.name())
        {
            continue; // handled above as a map/message field type
        }
        if let Some(rn) = reader.nested_type.iter().find(|n| n.name() == wn.name()) {
            check_message(rn, wn, messages);
        }
    }
}

fn is_in_oneof(f: &FieldDescriptorProto) -> bool {
    f.oneof_index.is_some()
}

fn oneof_name<'a>(parent: &'a DescriptorProto, f: &FieldDescriptorProto) -> Option<&'a str> {
    let idx = f.oneof_index?;
    parent
        .oneof_decl
        .get(idx as usize)
        .map(|o| o.name())
}

fn short_type_name(full: &str) -> &str {
    full.rsplit('.').next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::protobuf::parse;

    fn schema(s: &str) -> ProtoSchema {
        parse(s, &[]).unwrap()
    }

    #[test]
    fn renaming_a_field_is_compatible() {
        let old = schema(r#"syntax="proto3"; message M { int32 id = 1; }"#);
        let new = schema(r#"syntax="proto3"; message M { int32 identifier = 1; }"#);
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(ok, "{msgs:?}");
    }

    #[test]
    fn changing_field_number_is_flagged() {
        // number 1 dropped from reader, so old field 1 data becomes unknown;
        // that alone is compatible. But reusing number 1 with a different
        // wire-type-group type is not.
        let old = schema(r#"syntax="proto3"; message M { int32 id = 1; }"#);
        let new = schema(r#"syntax="proto3"; message M { string id = 1; }"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(!ok);
    }

    #[test]
    fn adding_a_new_field_number_is_compatible() {
        let old = schema(r#"syntax="proto3"; message M { int32 id = 1; }"#);
        let new = schema(r#"syntax="proto3"; message M { int32 id = 1; string name = 2; }"#);
        let (ok, msgs) = is_compatible(&new, &old);
        assert!(ok, "{msgs:?}");
    }

    #[test]
    fn proto2_required_field_addition_is_incompatible() {
        let old = schema(r#"syntax="proto2"; message M { required int32 id = 1; }"#);
        let new = schema(r#"syntax="proto2"; message M { required int32 id = 1; required string name = 2; }"#);
        let (ok, _) = is_compatible(&new, &old);
        assert!(!ok);
    }
}
