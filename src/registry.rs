//! The registry engine (component D): the one place that sequences parsing,
//! compatibility checking, storage, and mode/config gating into the
//! operations the wire protocol exposes. Every mutating path funnels through
//! here so that the invariants (dedup, dense versions, mode gates,
//! reference-before-delete) are enforced exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::compat::{self, PriorVersion};
use crate::config::ConfigResolver;
use crate::model::{extract_version_hint, Mode, Reference, Schema, SchemaId, SubjectVersion, Version};
use crate::parser::{ParsedSchema, ResolvedReference};
use crate::storage::{InsertOutcome, Storage};
use crate::{Error, Result};

/// A schema as submitted for registration, lookup, or a dry-run
/// compatibility check.
#[derive(Debug, Clone)]
pub struct SchemaSubmission {
    pub schema_type: crate::model::SchemaType,
    pub content: String,
    pub references: Vec<Reference>,
    pub metadata: Option<HashMap<String, String>>,
    pub rule_set: Option<Value>,
    pub normalize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub id: SchemaId,
    pub version: i32,
}

pub struct Registry {
    storage: Arc<dyn Storage>,
    config: ConfigResolver,
    /// Per-subject in-process lock serializing the dedup-check / compat-check
    /// / allocate-and-persist sequence in [`Registry::register`]. This is
    /// what makes "two concurrent registrations under one subject get dense,
    /// non-duplicate versions" hold for [`crate::storage::memory::MemoryStorage`],
    /// whose individual operations are each atomic but whose *sequence* here
    /// is not; the SQL and wide-column backends get the same guarantee from
    /// their own locking transactions instead; either way it's layered on
    /// top of, not a substitute for, the fingerprint compare-and-swap that
    /// `Storage::insert_schema` itself guarantees across every backend.
    subject_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Registry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let config = ConfigResolver::new(storage.clone());
        Self {
            storage,
            config,
            subject_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ConfigResolver {
        &self.config
    }

    fn subject_lock(&self, subject: &str) -> Arc<Mutex<()>> {
        self.subject_locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn resolve_references(&self, references: &[Reference]) -> Result<Vec<ResolvedReference>> {
        let mut out = Vec::with_capacity(references.len());
        for r in references {
            let sv = self
                .storage
                .get_subject_version(&r.subject, r.version)
                .await?
                .ok_or_else(|| Error::UnresolvedReference {
                    name: r.name.clone(),
                    subject: r.subject.clone(),
                    version: r.version,
                })?;
            let schema = self
                .storage
                .get_schema(sv.schema_id)
                .await?
                .ok_or_else(|| Error::internal("subject version points at a missing schema"))?;
            out.push(ResolvedReference {
                name: r.name.clone(),
                subject: r.subject.clone(),
                version: r.version,
                schema_type: schema.schema_type,
                content: schema.content,
            });
        }
        Ok(out)
    }

    async fn parse_submission(&self, submission: &SchemaSubmission) -> Result<ParsedSchema> {
        let references = self.resolve_references(&submission.references).await?;
        ParsedSchema::parse(submission.schema_type, &submission.content, &references)
    }

    /// Parse every active version of `subject` for use as compatibility
    /// priors, tagged with the compatibility-group metadata value each one
    /// carries (if any).
    async fn priors_for(&self, subject: &str, group_key: Option<&str>) -> Result<Vec<PriorVersion>> {
        let active = self.storage.active_versions(subject).await?;
        let mut out = Vec::with_capacity(active.len());
        for sv in active {
            let schema = self
                .storage
                .get_schema(sv.schema_id)
                .await?
                .ok_or_else(|| Error::internal("active version points at a missing schema"))?;
            let references = self.resolve_references(&schema.references).await?;
            let parsed = ParsedSchema::parse(schema.schema_type, &schema.content, &references)?;
            let group_value = group_key
                .and_then(|k| sv.metadata.as_ref().and_then(|m| m.get(k).cloned()));
            out.push(PriorVersion {
                version: sv.version,
                schema: parsed,
                group_value,
            });
        }
        Ok(out)
    }

    /// Register `submission` under `subject`, returning the id and version it
    /// was assigned (or the id/version of an identical, already-active
    /// registration — registration is idempotent for byte-identical
    /// resubmissions with matching metadata/rule set).
    pub async fn register(&self, subject: &str, mut submission: SchemaSubmission) -> Result<RegisterOutcome> {
        let mode = self.config.effective_mode(subject).await?;
        if mode == Mode::ReadOnly || mode == Mode::ReadOnlyOverride {
            return Err(Error::OperationNotPermitted);
        }

        let mut metadata = submission.metadata.take().unwrap_or_default();
        let version_hint = extract_version_hint(&mut metadata);
        submission.metadata = Some(metadata.clone());

        let parsed = self.parse_submission(&submission).await?;
        let canonical = parsed.canonicalize();
        let fingerprint = parsed.fingerprint();
        let content = if submission.normalize {
            String::from_utf8(canonical).map_err(|e| Error::internal(e.to_string()))?
        } else {
            submission.content.clone()
        };

        let lock = self.subject_lock(subject);
        let _guard = lock.lock().await;

        let existing_id = self.storage.lookup_by_fingerprint(&fingerprint).await?;

        // Per-subject dedup short-circuit runs before the compatibility check:
        // resubmitting content already active under this subject must be
        // idempotent even if it would no longer pass compatibility against
        // the current latest version.
        if let Some(id) = existing_id {
            if let Some(matching_version) = self
                .storage
                .find_subject_versions_by_schema_id(subject, id)
                .await?
                .into_iter()
                .next()
            {
                if let Some(sv) = self.storage.get_subject_version(subject, matching_version).await? {
                    if sv.metadata.as_ref() == submission.metadata.as_ref() {
                        return Ok(RegisterOutcome {
                            id,
                            version: matching_version,
                        });
                    }
                }
            }
        }

        if mode != Mode::Import {
            let effective = self.config.effective_config(subject).await?;
            let group_key = effective.compatibility_group.as_deref();
            let group_value = group_key.and_then(|k| metadata.get(k).cloned());
            let priors = self.priors_for(subject, group_key).await?;
            let result = compat::check(&parsed, effective.compatibility_level, &priors, group_value.as_deref());
            if !result.is_compatible {
                return Err(Error::IncompatibleSchema {
                    messages: result.messages,
                });
            }
        }

        let id = match existing_id {
            Some(id) => id,
            None => {
                let id = self.storage.next_schema_id().await?;
                let schema = Schema {
                    id,
                    schema_type: submission.schema_type,
                    content,
                    fingerprint,
                    references: submission.references.clone(),
                };
                match self.storage.insert_schema(id, &schema).await? {
                    InsertOutcome::Inserted => {
                        for r in &self.resolve_references(&submission.references).await? {
                            if let Some(referenced_sv) =
                                self.storage.get_subject_version(&r.subject, r.version).await?
                            {
                                self.storage.record_reference(id, referenced_sv.schema_id).await?;
                            }
                        }
                        id
                    }
                    InsertOutcome::Existing(winner) => winner,
                }
            }
        };

        let version = self.storage.allocate_version(subject, version_hint).await?;
        self.storage
            .put_subject_version(SubjectVersion {
                subject: subject.to_string(),
                version,
                schema_id: id,
                deleted: false,
                metadata: submission.metadata,
                rule_set: submission.rule_set,
            })
            .await?;

        Ok(RegisterOutcome { id, version })
    }

    /// Register `submission` under an explicit `id`/`version`, as the import
    /// workflow requires. Only valid while the subject's effective mode is
    /// `IMPORT`; skips compatibility checking and dedup-driven id reuse.
    pub async fn import_schema(
        &self,
        subject: &str,
        id: SchemaId,
        version: i32,
        submission: SchemaSubmission,
    ) -> Result<RegisterOutcome> {
        let mode = self.config.effective_mode(subject).await?;
        if mode != Mode::Import {
            return Err(Error::OperationNotPermitted);
        }

        let parsed = self.parse_submission(&submission).await?;
        let fingerprint = parsed.fingerprint();

        if let Some(existing) = self.storage.get_schema(id).await? {
            if existing.fingerprint != fingerprint {
                return Err(Error::SchemaIdConflict { id });
            }
        } else {
            let schema = Schema {
                id,
                schema_type: submission.schema_type,
                content: submission.content.clone(),
                fingerprint,
                references: submission.references.clone(),
            };
            self.storage.insert_schema(id, &schema).await?;
        }

        self.storage
            .put_subject_version(SubjectVersion {
                subject: subject.to_string(),
                version,
                schema_id: id,
                deleted: false,
                metadata: submission.metadata,
                rule_set: submission.rule_set,
            })
            .await?;

        Ok(RegisterOutcome { id, version })
    }

    pub async fn get_by_id(&self, id: SchemaId) -> Result<Schema> {
        self.storage.get_schema(id).await?.ok_or(Error::SchemaNotFound)
    }

    pub async fn get_by_subject_version(
        &self,
        subject: &str,
        version: Version,
        include_deleted: bool,
    ) -> Result<(SubjectVersion, Schema)> {
        let sv = match version {
            Version::Latest => self
                .storage
                .get_latest_subject_version(subject, include_deleted)
                .await?
                .ok_or_else(|| Error::SubjectNotFound(subject.to_string()))?,
            Version::Number(n) => self
                .storage
                .get_subject_version(subject, n)
                .await?
                .ok_or(Error::VersionNotFound {
                    subject: subject.to_string(),
                    version: n,
                })?,
        };
        if sv.deleted && !include_deleted {
            return Err(Error::VersionSoftDeleted {
                subject: subject.to_string(),
                version: sv.version,
            });
        }
        let schema = self
            .storage
            .get_schema(sv.schema_id)
            .await?
            .ok_or_else(|| Error::internal("subject version points at a missing schema"))?;
        Ok((sv, schema))
    }

    /// Find the version of `subject` that already holds byte-identical
    /// content to `submission`, without registering anything.
    pub async fn lookup(&self, subject: &str, submission: SchemaSubmission) -> Result<RegisterOutcome> {
        let parsed = self.parse_submission(&submission).await?;
        let fingerprint = parsed.fingerprint();
        let id = self
            .storage
            .lookup_by_fingerprint(&fingerprint)
            .await?
            .ok_or(Error::SchemaNotFound)?;
        let version = self
            .storage
            .find_subject_versions_by_schema_id(subject, id)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::SchemaNotFound)?;
        Ok(RegisterOutcome { id, version })
    }

    /// Dry-run compatibility check against `subject`'s configured level,
    /// without registering anything.
    pub async fn check_compatibility(
        &self,
        subject: &str,
        submission: SchemaSubmission,
    ) -> Result<(bool, Vec<String>)> {
        let parsed = self.parse_submission(&submission).await?;
        let effective = self.config.effective_config(subject).await?;
        let group_key = effective.compatibility_group.as_deref();
        let group_value = group_key.and_then(|k| submission.metadata.as_ref().and_then(|m| m.get(k).cloned()));
        let priors = self.priors_for(subject, group_key).await?;
        let result = compat::check(&parsed, effective.compatibility_level, &priors, group_value.as_deref());
        Ok((result.is_compatible, result.messages))
    }

    pub async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        self.storage.list_subjects(include_deleted).await
    }

    pub async fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<i32>> {
        let versions = self.storage.list_versions(subject, include_deleted).await?;
        if versions.is_empty() && !self.storage.subject_exists(subject, true).await? {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }
        Ok(versions)
    }

    pub async fn soft_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        if self.storage.is_subject_soft_deleted(subject).await? {
            return Err(Error::SubjectSoftDeleted(subject.to_string()));
        }
        self.ensure_not_referenced(subject, None).await?;
        self.storage.soft_delete_subject(subject).await
    }

    pub async fn permanent_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        if !self.storage.is_subject_soft_deleted(subject).await? {
            return Err(Error::SubjectNotSoftDeleted(subject.to_string()));
        }
        self.ensure_not_referenced(subject, None).await?;
        self.storage.permanent_delete_subject(subject).await
    }

    pub async fn soft_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        let sv = self
            .storage
            .get_subject_version(subject, version)
            .await?
            .ok_or(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        if sv.deleted {
            return Err(Error::VersionSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        self.ensure_not_referenced(subject, Some(version)).await?;
        self.storage.soft_delete_version(subject, version).await
    }

    pub async fn permanent_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        let sv = self
            .storage
            .get_subject_version(subject, version)
            .await?
            .ok_or(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        if !sv.deleted {
            return Err(Error::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        self.ensure_not_referenced(subject, Some(version)).await?;
        self.storage.permanent_delete_version(subject, version).await
    }

    pub async fn undelete_version(&self, subject: &str, version: i32) -> Result<()> {
        let sv = self
            .storage
            .get_subject_version(subject, version)
            .await?
            .ok_or(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        if !sv.deleted {
            return Err(Error::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        self.storage.undelete_version(subject, version).await
    }

    pub async fn undelete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        if !self.storage.is_subject_soft_deleted(subject).await? {
            return Err(Error::SubjectNotSoftDeleted(subject.to_string()));
        }
        self.storage.undelete_subject(subject).await
    }

    pub async fn subjects_for_schema_id(&self, id: SchemaId) -> Result<Vec<String>> {
        self.storage.subjects_for_schema_id(id).await
    }

    /// Advance the id allocator past every id a completed import batch used
    /// explicitly, so subsequent normal registrations don't collide with it.
    pub async fn set_id_floor(&self, floor: SchemaId) -> Result<()> {
        self.storage.set_id_floor(floor).await
    }

    /// Refuse to delete a schema (subject-wide, or a single version) that's
    /// still referenced by another live schema.
    async fn ensure_not_referenced(&self, subject: &str, version: Option<i32>) -> Result<()> {
        let versions = match version {
            Some(v) => vec![v],
            None => self.storage.list_versions(subject, false).await?,
        };
        for v in versions {
            if let Some(sv) = self.storage.get_subject_version(subject, v).await? {
                let referencing = self.storage.referencing_schema_ids(sv.schema_id).await?;
                if !referencing.is_empty() {
                    return Err(Error::ReferenceExists);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn avro_submission(schema_json: &str) -> SchemaSubmission {
        SchemaSubmission {
            schema_type: crate::model::SchemaType::Avro,
            content: schema_json.to_string(),
            references: Vec::new(),
            metadata: None,
            rule_set: None,
            normalize: false,
        }
    }

    fn registry() -> Registry {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        Registry::new(storage)
    }

    #[tokio::test]
    async fn first_registration_gets_version_one() {
        let reg = registry();
        let outcome = reg
            .register(
                "users-value",
                avro_submission(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#),
            )
            .await
            .unwrap();
        assert_eq!(outcome.version, 1);
    }

    #[tokio::test]
    async fn resubmitting_identical_schema_is_idempotent() {
        let reg = registry();
        let schema = avro_submission(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#);
        let first = reg.register("users-value", schema.clone()).await.unwrap();
        let second = reg.register("users-value", schema).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn incompatible_change_is_rejected() {
        let reg = registry();
        reg.register(
            "users-value",
            avro_submission(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#),
        )
        .await
        .unwrap();

        let err = reg
            .register(
                "users-value",
                avro_submission(
                    r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"email","type":"string"}]}"#,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IncompatibleSchema { .. }));
    }

    #[tokio::test]
    async fn identical_schema_across_subjects_shares_an_id() {
        let reg = registry();
        let schema = avro_submission(r#"{"type":"record","name":"Shared","fields":[{"name":"id","type":"long"}]}"#);
        let a = reg.register("a-value", schema.clone()).await.unwrap();
        let b = reg.register("b-value", schema).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn readonly_mode_blocks_registration() {
        let reg = registry();
        reg.config().set_global_mode(Mode::ReadOnly).await.unwrap();
        let err = reg
            .register("users-value", avro_submission(r#"{"type":"string"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationNotPermitted));
    }

    #[tokio::test]
    async fn resubmitting_an_older_active_version_is_idempotent_even_if_incompatible_with_latest() {
        let reg = registry();
        let v1 = avro_submission(
            r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"}]}"#,
        );
        let first = reg.register("users-value", v1.clone()).await.unwrap();
        assert_eq!(first.version, 1);

        reg.register(
            "users-value",
            avro_submission(r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#),
        )
        .await
        .unwrap();

        // v1 is no longer backward-compatible with the current latest (v2
        // dropped 'name'), but it's still active under this subject, so
        // resubmitting it must hit the dedup short-circuit rather than fail
        // a compatibility check against the latest version.
        let resubmit = reg.register("users-value", v1).await.unwrap();
        assert_eq!(resubmit, first);
    }

    #[tokio::test]
    async fn deleting_a_referenced_schema_is_refused() {
        let reg = registry();
        reg.register(
            "common-value",
            avro_submission(r#"{"type":"record","name":"Common","fields":[{"name":"id","type":"long"}]}"#),
        )
        .await
        .unwrap();

        let with_ref = SchemaSubmission {
            references: vec![Reference {
                name: "Common".into(),
                subject: "common-value".into(),
                version: 1,
            }],
            ..avro_submission(
                r#"{"type":"record","name":"User","fields":[{"name":"common","type":"Common"}]}"#,
            )
        };
        reg.register("users-value", with_ref).await.unwrap();

        let err = reg.soft_delete_subject("common-value").await.unwrap_err();
        assert!(matches!(err, Error::ReferenceExists));
    }
}
