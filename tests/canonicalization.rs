//! Canonical form is the wire contract for dedup identity (see DESIGN.md), so
//! `canonicalize(parse(x))` must be a fixed point: re-parsing and
//! re-canonicalizing already-canonical bytes must reproduce them exactly.

use proptest::prelude::*;

use schema_registry_core::parser::json_schema;

/// A small recursive generator for JSON Schema documents built only from
/// keywords every draft agrees on, so every generated document is valid and
/// `jsonschema::validator_for` never rejects it.
fn schema_doc() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::json!({"type": "string"})),
        Just(serde_json::json!({"type": "integer"})),
        Just(serde_json::json!({"type": "boolean"})),
        Just(serde_json::json!({"type": "number", "minimum": 0})),
    ];

    leaf.prop_recursive(3, 16, 4, |inner| {
        prop::collection::btree_map(
            "[a-z]{1,8}",
            inner,
            0..4,
        )
        .prop_map(|properties| {
            let required: Vec<String> = properties.keys().take(1).cloned().collect();
            serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        })
    })
}

proptest! {
    #[test]
    fn canonicalize_is_a_fixed_point(doc in schema_doc()) {
        let content = serde_json::to_string(&doc).unwrap();
        let parsed = json_schema::parse(&content, &[]).unwrap();
        let first = json_schema::canonicalize(&parsed);

        let reparsed = json_schema::parse(&String::from_utf8(first.clone()).unwrap(), &[]).unwrap();
        let second = json_schema::canonicalize(&reparsed);

        prop_assert_eq!(first, second);
    }
}
