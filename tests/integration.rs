use std::sync::Arc;

use anyhow::Result;

use schema_registry_core::config::ConfigResolver;
use schema_registry_core::model::{CompatibilityLevel, Config, Mode, Reference, SchemaType, Version};
use schema_registry_core::registry::{Registry, SchemaSubmission};
use schema_registry_core::storage::memory::MemoryStorage;
use schema_registry_core::storage::Storage;
use schema_registry_core::Error;

fn avro(content: &str) -> SchemaSubmission {
    SchemaSubmission {
        schema_type: SchemaType::Avro,
        content: content.to_string(),
        references: Vec::new(),
        metadata: None,
        rule_set: None,
        normalize: false,
    }
}

fn proto(content: &str) -> SchemaSubmission {
    SchemaSubmission {
        schema_type: SchemaType::Protobuf,
        content: content.to_string(),
        references: Vec::new(),
        metadata: None,
        rule_set: None,
        normalize: false,
    }
}

fn new_registry() -> Registry {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    Registry::new(storage)
}

/// Scenario 1: basic backward-compatible evolution, then an idempotent resubmission.
#[tokio::test]
async fn basic_backward_compatible_evolution() -> Result<()> {
    let reg = new_registry();

    let v1 = reg
        .register(
            "users-value",
            avro(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"}]}"#),
        )
        .await?;
    assert_eq!(v1.version, 1);

    let v2 = reg
        .register(
            "users-value",
            avro(
                r#"{"type":"record","name":"User","fields":[
                    {"name":"id","type":"int"},
                    {"name":"name","type":"string"},
                    {"name":"email","type":"string","default":""}
                ]}"#,
            ),
        )
        .await?;
    assert_eq!(v2.version, 2);
    assert_ne!(v1.id, v2.id);

    // Resubmitting v2's content verbatim must not mint a third version.
    let v3 = reg
        .register(
            "users-value",
            avro(
                r#"{"type":"record","name":"User","fields":[
                    {"name":"id","type":"int"},
                    {"name":"name","type":"string"},
                    {"name":"email","type":"string","default":""}
                ]}"#,
            ),
        )
        .await?;
    assert_eq!(v3, v2);

    Ok(())
}

/// Scenario 2: a backward-incompatible change is rejected with a diagnostic
/// naming the offending version.
#[tokio::test]
async fn backward_incompatible_change_is_rejected() -> Result<()> {
    let reg = new_registry();
    reg.register(
        "users-value",
        avro(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"int"}]}"#),
    )
    .await?;

    let err = reg
        .register(
            "users-value",
            avro(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"int"},{"name":"email","type":"string"}]}"#),
        )
        .await
        .unwrap_err();

    match err {
        Error::IncompatibleSchema { messages } => assert!(!messages.is_empty()),
        other => panic!("expected IncompatibleSchema, got {other:?}"),
    }
    Ok(())
}

/// Scenario 3: identical content registered under two subjects shares one id,
/// and the reverse index reports both subjects.
#[tokio::test]
async fn cross_subject_dedup_shares_an_id() -> Result<()> {
    let reg = new_registry();
    let schema = avro(r#"{"type":"record","name":"Shared","fields":[{"name":"id","type":"long"}]}"#);

    let a = reg.register("orders-value", schema.clone()).await?;
    let b = reg.register("invoices-value", schema).await?;
    assert_eq!(a.id, b.id);

    let mut subjects = reg.subjects_for_schema_id(a.id).await?;
    subjects.sort();
    assert_eq!(subjects, vec!["invoices-value".to_string(), "orders-value".to_string()]);
    Ok(())
}

/// Scenario 4: Protobuf field-number compatibility — crossing wire-type
/// groups is rejected, purely additive fields are accepted.
#[tokio::test]
async fn protobuf_field_number_compatibility() -> Result<()> {
    let reg = new_registry();
    reg.register(
        "events-value",
        proto(r#"syntax = "proto3"; message Event { int32 id = 1; }"#),
    )
    .await?;

    // string and int32 sit in different wire-type groups (length-delimited
    // vs. varint), so reusing field number 1 with the new type is rejected
    // even though the field keeps its name.
    let crossed_group = reg
        .register(
            "events-value",
            proto(r#"syntax = "proto3"; message Event { string id = 1; }"#),
        )
        .await
        .unwrap_err();
    assert!(matches!(crossed_group, Error::IncompatibleSchema { .. }));

    let additive = reg
        .register(
            "events-value",
            proto(r#"syntax = "proto3"; message Event { int32 id = 1; string name = 2; }"#),
        )
        .await?;
    assert_eq!(additive.version, 2);
    Ok(())
}

/// Scenario 5: BACKWARD_TRANSITIVE must check every active prior version, not
/// just the latest one.
#[tokio::test]
async fn transitive_compatibility_checks_every_prior_version() -> Result<()> {
    let reg = new_registry();
    reg.config()
        .set_subject_config(
            "widgets-value",
            Config {
                compatibility_level: Some(CompatibilityLevel::BackwardTransitive),
                ..Default::default()
            },
        )
        .await?;

    // v1: just an id.
    reg.register(
        "widgets-value",
        avro(r#"{"type":"record","name":"Widget","fields":[{"name":"id","type":"int"}]}"#),
    )
    .await?;

    // v2: adds a defaulted field — backward-compatible with v1.
    reg.register(
        "widgets-value",
        avro(
            r#"{"type":"record","name":"Widget","fields":[
                {"name":"id","type":"int"},
                {"name":"color","type":"string","default":"red"}
            ]}"#,
        ),
    )
    .await?;

    // v3 drops `color` entirely — compatible with v1 (which never had it) but
    // not with v2 (whose reader would require it without a default surviving).
    // Under BACKWARD_TRANSITIVE this must still be rejected because it is
    // checked against v2 as well as v1.
    let err = reg
        .register(
            "widgets-value",
            avro(
                r#"{"type":"record","name":"Widget","fields":[
                    {"name":"id","type":"int"},
                    {"name":"color","type":"int","default":0}
                ]}"#,
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleSchema { .. }));
    Ok(())
}

/// Scenario 6: registering identical content again after a soft delete
/// creates a new version under the same schema id, rather than reviving the
/// deleted one.
#[tokio::test]
async fn reregistration_after_soft_delete_creates_a_new_version() -> Result<()> {
    let reg = new_registry();
    let schema = avro(r#"{"type":"record","name":"Thing","fields":[{"name":"id","type":"int"}]}"#);

    let v1 = reg.register("things-value", schema.clone()).await?;
    assert_eq!(v1.version, 1);

    reg.soft_delete_version("things-value", 1).await?;

    let v2 = reg.register("things-value", schema).await?;
    assert_eq!(v2.version, 2);
    assert_eq!(v2.id, v1.id);
    Ok(())
}

/// Scenario 6b: undelete is reversible and restores the original version's
/// visibility without creating anything new.
#[tokio::test]
async fn undelete_restores_a_soft_deleted_version() -> Result<()> {
    let reg = new_registry();
    reg.register(
        "revivable-value",
        avro(r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#),
    )
    .await?;
    reg.soft_delete_version("revivable-value", 1).await?;

    let hidden = reg.get_by_subject_version("revivable-value", Version::Number(1), false).await;
    assert!(matches!(hidden, Err(Error::VersionSoftDeleted { .. })));

    reg.undelete_version("revivable-value", 1).await?;
    let (sv, _schema) = reg.get_by_subject_version("revivable-value", Version::Number(1), false).await?;
    assert!(!sv.deleted);
    Ok(())
}

/// Scenario 7: import preserves caller-supplied ids, and SetIDFloor advances
/// the allocator past them so normal registration never collides.
#[tokio::test]
async fn import_preserves_ids_and_floor_advances_allocator() -> Result<()> {
    let reg = new_registry();
    reg.config().set_global_mode(Mode::Import).await?;

    reg.import_schema(
        "x-value",
        42,
        1,
        avro(r#"{"type":"record","name":"X","fields":[{"name":"a","type":"int"}]}"#),
    )
    .await?;
    reg.import_schema(
        "y-value",
        17,
        1,
        avro(r#"{"type":"record","name":"Y","fields":[{"name":"b","type":"int"}]}"#),
    )
    .await?;

    assert_eq!(reg.get_by_id(42).await?.id, 42);
    assert_eq!(reg.get_by_id(17).await?.id, 17);

    reg.set_id_floor(43).await?;
    reg.config().set_global_mode(Mode::ReadWrite).await?;

    let fresh = reg
        .register(
            "z-value",
            avro(r#"{"type":"record","name":"Z","fields":[{"name":"c","type":"int"}]}"#),
        )
        .await?;
    assert!(fresh.id >= 43);
    Ok(())
}

/// Scenario 8: concurrent registration of byte-identical content from many
/// tasks against shared storage yields exactly one version and one id.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_registrations_yield_one_version() -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let reg = Arc::new(Registry::new(storage));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let reg = reg.clone();
        handles.push(tokio::spawn(async move {
            reg.register(
                "shared-value",
                avro(r#"{"type":"record","name":"Shared","fields":[{"name":"id","type":"int"}]}"#),
            )
            .await
        }));
    }

    let mut ids = Vec::new();
    let mut versions = Vec::new();
    for h in handles {
        let outcome = h.await??;
        ids.push(outcome.id);
        versions.push(outcome.version);
    }

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert!(versions.iter().all(|v| *v == 1));
    Ok(())
}

/// Scenario 9: concurrent registration of distinct, pairwise-compatible
/// schemas under one subject must assign a dense, gapless version range.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_registrations_are_dense() -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let reg = Arc::new(Registry::new(storage));
    reg.config()
        .set_subject_config(
            "growing-value",
            Config {
                compatibility_level: Some(CompatibilityLevel::None),
                ..Default::default()
            },
        )
        .await?;

    let mut handles = Vec::new();
    for i in 0..10 {
        let reg = reg.clone();
        handles.push(tokio::spawn(async move {
            reg.register(
                "growing-value",
                avro(&format!(
                    r#"{{"type":"record","name":"Rec{i}","fields":[{{"name":"id","type":"int"}}]}}"#
                )),
            )
            .await
        }));
    }

    let mut versions = Vec::new();
    for h in handles {
        versions.push(h.await??.version);
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=10).collect::<Vec<_>>());
    Ok(())
}

/// A referenced schema cannot be deleted until the referencing schema is
/// gone too, and deleting a subject with no versions left behind is a
/// `SubjectNotFound`, not a silent no-op.
#[tokio::test]
async fn delete_guards_hold_across_references_and_missing_subjects() -> Result<()> {
    let reg = new_registry();
    reg.register(
        "common-value",
        avro(r#"{"type":"record","name":"Common","fields":[{"name":"id","type":"long"}]}"#),
    )
    .await?;
    reg.register(
        "user-value",
        SchemaSubmission {
            references: vec![Reference {
                name: "Common".into(),
                subject: "common-value".into(),
                version: 1,
            }],
            ..avro(r#"{"type":"record","name":"User","fields":[{"name":"common","type":"Common"}]}"#)
        },
    )
    .await?;

    let err = reg.soft_delete_version("common-value", 1).await.unwrap_err();
    assert!(matches!(err, Error::ReferenceExists));

    let missing = reg.list_versions("nonexistent-value", true).await.unwrap_err();
    assert!(matches!(missing, Error::SubjectNotFound(_)));
    Ok(())
}

/// The global config/mode reset-on-delete behavior from the resolver.
#[tokio::test]
async fn deleting_global_config_reverts_to_built_in_default() -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let resolver = ConfigResolver::new(storage);

    resolver
        .set_global_config(Config {
            compatibility_level: Some(CompatibilityLevel::Full),
            ..Default::default()
        })
        .await?;
    assert_eq!(resolver.effective_config("s").await?.compatibility_level, CompatibilityLevel::Full);

    resolver.delete_subject_config("s").await?; // no subject row existed; no-op
    assert_eq!(resolver.effective_config("s").await?.compatibility_level, CompatibilityLevel::Full);

    Ok(())
}
