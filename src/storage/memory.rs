//! In-memory [`Storage`] backed by `dashmap`, the same concurrent-map crate
//! the teacher client used for its schema cache. Single process only: all
//! three storage guarantees hold trivially because there's only ever one
//! writer's worth of state to look at.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Config, Mode, Schema, SchemaId, SubjectVersion};
use crate::storage::{InsertOutcome, Storage};
use crate::{Error, Result};

#[derive(Default)]
pub struct MemoryStorage {
    schemas: DashMap<SchemaId, Schema>,
    fingerprints: DashMap<[u8; 32], SchemaId>,
    next_id: AtomicU32,
    subject_versions: DashMap<(String, i32), SubjectVersion>,
    next_version: DashMap<String, i32>,
    configs: DashMap<Option<String>, Config>,
    modes: DashMap<Option<String>, Mode>,
    references: DashMap<SchemaId, Vec<SchemaId>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn versions_for<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = SubjectVersion> + 'a {
        self.subject_versions
            .iter()
            .filter(move |e| e.key().0 == subject)
            .map(|e| e.value().clone())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn next_schema_id(&self) -> Result<SchemaId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn lookup_by_fingerprint(&self, fingerprint: &[u8; 32]) -> Result<Option<SchemaId>> {
        Ok(self.fingerprints.get(fingerprint).map(|e| *e.value()))
    }

    async fn insert_schema(&self, id: SchemaId, schema: &Schema) -> Result<InsertOutcome> {
        match self.fingerprints.entry(schema.fingerprint) {
            dashmap::mapref::entry::Entry::Occupied(e) => Ok(InsertOutcome::Existing(*e.get())),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(id);
                self.schemas.insert(id, schema.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        Ok(self.schemas.get(&id).map(|e| e.value().clone()))
    }

    async fn allocate_version(&self, subject: &str, hint: Option<i32>) -> Result<i32> {
        let mut entry = self.next_version.entry(subject.to_string()).or_insert(1);
        let next = *entry;
        let assigned = match hint {
            Some(h) if h == next => h,
            Some(_) | None => next,
        };
        *entry = assigned + 1;
        Ok(assigned)
    }

    async fn put_subject_version(&self, subject_version: SubjectVersion) -> Result<()> {
        let key = (subject_version.subject.clone(), subject_version.version);
        self.subject_versions.insert(key, subject_version);
        Ok(())
    }

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Option<SubjectVersion>> {
        Ok(self
            .subject_versions
            .get(&(subject.to_string(), version))
            .map(|e| e.value().clone()))
    }

    async fn get_latest_subject_version(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Option<SubjectVersion>> {
        Ok(self
            .versions_for(subject)
            .filter(|v| include_deleted || !v.deleted)
            .max_by_key(|v| v.version))
    }

    async fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<i32>> {
        let mut versions: Vec<i32> = self
            .versions_for(subject)
            .filter(|v| include_deleted || !v.deleted)
            .map(|v| v.version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self
            .subject_versions
            .iter()
            .filter(|e| include_deleted || !e.value().deleted)
            .map(|e| e.key().0.clone())
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn active_versions(&self, subject: &str) -> Result<Vec<SubjectVersion>> {
        let mut versions: Vec<SubjectVersion> = self.versions_for(subject).filter(|v| !v.deleted).collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn find_subject_versions_by_schema_id(&self, subject: &str, id: SchemaId) -> Result<Vec<i32>> {
        let mut versions: Vec<i32> = self
            .versions_for(subject)
            .filter(|v| !v.deleted && v.schema_id == id)
            .map(|v| v.version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn soft_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        match self.subject_versions.get_mut(&(subject.to_string(), version)) {
            Some(mut e) => {
                e.value_mut().deleted = true;
                Ok(())
            }
            None => Err(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
        }
    }

    async fn permanent_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        self.subject_versions.remove(&(subject.to_string(), version));
        Ok(())
    }

    async fn soft_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, false).await?;
        for v in &versions {
            self.soft_delete_version(subject, *v).await?;
        }
        Ok(versions)
    }

    async fn permanent_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, true).await?;
        for v in &versions {
            self.permanent_delete_version(subject, *v).await?;
        }
        self.next_version.remove(subject);
        Ok(versions)
    }

    async fn undelete_version(&self, subject: &str, version: i32) -> Result<()> {
        match self.subject_versions.get_mut(&(subject.to_string(), version)) {
            Some(mut e) => {
                e.value_mut().deleted = false;
                Ok(())
            }
            None => Err(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
        }
    }

    async fn undelete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, true).await?;
        for v in &versions {
            self.undelete_version(subject, *v).await?;
        }
        Ok(versions)
    }

    async fn is_subject_soft_deleted(&self, subject: &str) -> Result<bool> {
        let all: Vec<SubjectVersion> = self.versions_for(subject).collect();
        Ok(!all.is_empty() && all.iter().all(|v| v.deleted))
    }

    async fn subjects_for_schema_id(&self, id: SchemaId) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self
            .subject_versions
            .iter()
            .filter(|e| !e.value().deleted && e.value().schema_id == id)
            .map(|e| e.key().0.clone())
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn set_id_floor(&self, floor: SchemaId) -> Result<()> {
        self.next_id.fetch_max(floor.saturating_sub(1), Ordering::SeqCst);
        Ok(())
    }

    async fn get_config(&self, subject: Option<&str>) -> Result<Option<Config>> {
        Ok(self.configs.get(&subject.map(str::to_string)).map(|e| e.value().clone()))
    }

    async fn set_config(&self, subject: Option<&str>, config: Config) -> Result<()> {
        self.configs.insert(subject.map(str::to_string), config);
        Ok(())
    }

    async fn delete_config(&self, subject: Option<&str>) -> Result<()> {
        self.configs.remove(&subject.map(str::to_string));
        Ok(())
    }

    async fn get_mode(&self, subject: Option<&str>) -> Result<Option<Mode>> {
        Ok(self.modes.get(&subject.map(str::to_string)).map(|e| *e.value()))
    }

    async fn set_mode(&self, subject: Option<&str>, mode: Mode) -> Result<()> {
        self.modes.insert(subject.map(str::to_string), mode);
        Ok(())
    }

    async fn delete_mode(&self, subject: Option<&str>) -> Result<()> {
        self.modes.remove(&subject.map(str::to_string));
        Ok(())
    }

    async fn record_reference(&self, referencing_id: SchemaId, referenced_id: SchemaId) -> Result<()> {
        self.references.entry(referenced_id).or_default().push(referencing_id);
        Ok(())
    }

    async fn referencing_schema_ids(&self, id: SchemaId) -> Result<Vec<SchemaId>> {
        Ok(self.references.get(&id).map(|e| e.value().clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reference;

    fn schema(id: SchemaId, content: &str) -> Schema {
        Schema {
            id,
            schema_type: crate::model::SchemaType::Avro,
            content: content.to_string(),
            fingerprint: crate::fingerprint::fingerprint(content.as_bytes()),
            references: Vec::<Reference>::new(),
        }
    }

    #[tokio::test]
    async fn fingerprint_insert_is_compare_and_swap() {
        let store = MemoryStorage::new();
        let s = schema(1, "A");
        assert_eq!(store.insert_schema(1, &s).await.unwrap(), InsertOutcome::Inserted);
        let s2 = schema(2, "A");
        assert_eq!(
            store.insert_schema(2, &s2).await.unwrap(),
            InsertOutcome::Existing(1)
        );
    }

    #[tokio::test]
    async fn versions_are_dense_and_start_at_one() {
        let store = MemoryStorage::new();
        assert_eq!(store.allocate_version("s", None).await.unwrap(), 1);
        assert_eq!(store.allocate_version("s", None).await.unwrap(), 2);
        assert_eq!(store.allocate_version("s", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn soft_delete_then_permanent_delete_clears_versions() {
        let store = MemoryStorage::new();
        store
            .put_subject_version(SubjectVersion {
                subject: "s".into(),
                version: 1,
                schema_id: 1,
                deleted: false,
                metadata: None,
                rule_set: None,
            })
            .await
            .unwrap();
        store.soft_delete_subject("s").await.unwrap();
        assert!(store.is_subject_soft_deleted("s").await.unwrap());
        store.permanent_delete_subject("s").await.unwrap();
        assert!(store.list_versions("s", true).await.unwrap().is_empty());
    }
}
