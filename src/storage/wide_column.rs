//! Eventually-consistent wide-column storage backend.
//!
//! The specification's reference deployment target for this tier is a
//! Cassandra-style wide-column store; no client for one exists anywhere in
//! this workspace's dependency lineage, so this backend targets Redis
//! instead, using the same primitives a Cassandra driver would reach for
//! (atomic counters for id/version allocation, `SET NX` for the fingerprint
//! compare-and-swap) so that swapping the underlying store later is a matter
//! of reimplementing this module, not the trait.
//!
//! "Eventually consistent" here means what it means for the real target:
//! `get_schema` right after a write on a *different* connection is not
//! guaranteed to observe it without a read-repair or quorum read, which this
//! thin client does not attempt. Callers that need read-your-writes across
//! instances should use [`super::sql`] instead.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::model::{Config, Mode, Schema, SchemaId, SubjectVersion};
use crate::storage::{InsertOutcome, Storage};
use crate::{Error, Result};

pub struct WideColumnStorage {
    conn: ConnectionManager,
}

impl WideColumnStorage {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(Error::storage)?;
        let conn = ConnectionManager::new(client).await.map_err(Error::storage)?;
        Ok(Self { conn })
    }

    fn fingerprint_key(fingerprint: &[u8; 32]) -> String {
        format!("schema:fingerprint:{}", hex::encode(fingerprint))
    }

    fn schema_key(id: SchemaId) -> String {
        format!("schema:id:{id}")
    }

    fn subject_version_key(subject: &str, version: i32) -> String {
        format!("subject:{subject}:version:{version}")
    }

    fn subject_versions_set_key(subject: &str) -> String {
        format!("subject:{subject}:versions")
    }

    fn config_key(subject: Option<&str>) -> String {
        format!("config:{}", subject.unwrap_or(""))
    }

    fn mode_key(subject: Option<&str>) -> String {
        format!("mode:{}", subject.unwrap_or(""))
    }

    fn references_key(referenced_id: SchemaId) -> String {
        format!("schema:references:{referenced_id}")
    }
}

#[async_trait]
impl Storage for WideColumnStorage {
    async fn next_schema_id(&self) -> Result<SchemaId> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr("schema:next_id", 1u64).await.map_err(Error::storage)?;
        Ok(id as SchemaId)
    }

    async fn lookup_by_fingerprint(&self, fingerprint: &[u8; 32]) -> Result<Option<SchemaId>> {
        let mut conn = self.conn.clone();
        let id: Option<u64> = conn.get(Self::fingerprint_key(fingerprint)).await.map_err(Error::storage)?;
        Ok(id.map(|v| v as SchemaId))
    }

    async fn insert_schema(&self, id: SchemaId, schema: &Schema) -> Result<InsertOutcome> {
        let mut conn = self.conn.clone();
        let key = Self::fingerprint_key(&schema.fingerprint);
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(id as u64)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(Error::storage)?;
        if !set {
            let existing: u64 = conn.get(&key).await.map_err(Error::storage)?;
            return Ok(InsertOutcome::Existing(existing as SchemaId));
        }
        let payload = serde_json::to_string(schema).map_err(Error::storage)?;
        conn.set::<_, _, ()>(Self::schema_key(id), payload).await.map_err(Error::storage)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::schema_key(id)).await.map_err(Error::storage)?;
        payload.map(|p| serde_json::from_str(&p).map_err(Error::storage)).transpose()
    }

    async fn allocate_version(&self, subject: &str, hint: Option<i32>) -> Result<i32> {
        let mut conn = self.conn.clone();
        let next: i64 = conn
            .incr(format!("subject:{subject}:next_version"), 1i64)
            .await
            .map_err(Error::storage)?;
        Ok(match hint {
            Some(h) if h as i64 == next => h,
            _ => next as i32,
        })
    }

    async fn put_subject_version(&self, subject_version: SubjectVersion) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::subject_version_key(&subject_version.subject, subject_version.version);
        let payload = serde_json::to_string(&subject_version).map_err(Error::storage)?;
        conn.set::<_, _, ()>(&key, payload).await.map_err(Error::storage)?;
        conn.sadd::<_, _, ()>(
            Self::subject_versions_set_key(&subject_version.subject),
            subject_version.version,
        )
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Option<SubjectVersion>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(Self::subject_version_key(subject, version))
            .await
            .map_err(Error::storage)?;
        payload.map(|p| serde_json::from_str(&p).map_err(Error::storage)).transpose()
    }

    async fn get_latest_subject_version(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Option<SubjectVersion>> {
        let versions = self.list_raw_versions(subject).await?;
        let mut candidates = Vec::new();
        for v in versions {
            if let Some(sv) = self.get_subject_version(subject, v).await? {
                if include_deleted || !sv.deleted {
                    candidates.push(sv);
                }
            }
        }
        Ok(candidates.into_iter().max_by_key(|v| v.version))
    }

    async fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        for v in self.list_raw_versions(subject).await? {
            if let Some(sv) = self.get_subject_version(subject, v).await? {
                if include_deleted || !sv.deleted {
                    out.push(v);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    async fn list_subjects(&self, _include_deleted: bool) -> Result<Vec<String>> {
        // Wide-column stores in this family don't offer an efficient
        // "scan all partition keys" primitive; callers that need a subject
        // index should maintain one alongside this backend.
        Err(Error::internal(
            "list_subjects is not supported by the wide-column backend without a secondary index",
        ))
    }

    async fn active_versions(&self, subject: &str) -> Result<Vec<SubjectVersion>> {
        let mut out = Vec::new();
        for v in self.list_raw_versions(subject).await? {
            if let Some(sv) = self.get_subject_version(subject, v).await? {
                if !sv.deleted {
                    out.push(sv);
                }
            }
        }
        out.sort_by_key(|v| v.version);
        Ok(out)
    }

    async fn find_subject_versions_by_schema_id(&self, subject: &str, id: SchemaId) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        for v in self.list_raw_versions(subject).await? {
            if let Some(sv) = self.get_subject_version(subject, v).await? {
                if !sv.deleted && sv.schema_id == id {
                    out.push(v);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    async fn soft_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        let mut sv = self
            .get_subject_version(subject, version)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        sv.deleted = true;
        self.put_subject_version(sv).await
    }

    async fn permanent_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::subject_version_key(subject, version)).await.map_err(Error::storage)?;
        conn.srem::<_, _, ()>(Self::subject_versions_set_key(subject), version)
            .await
            .map_err(Error::storage)?;
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
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(format!("subject:{subject}:next_version")).await.map_err(Error::storage)?;
        Ok(versions)
    }

    async fn undelete_version(&self, subject: &str, version: i32) -> Result<()> {
        let mut sv = self
            .get_subject_version(subject, version)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })?;
        sv.deleted = false;
        self.put_subject_version(sv).await
    }

    async fn undelete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, true).await?;
        for v in &versions {
            self.undelete_version(subject, *v).await?;
        }
        Ok(versions)
    }

    async fn subjects_for_schema_id(&self, _id: SchemaId) -> Result<Vec<String>> {
        Err(Error::internal(
            "subjects_for_schema_id is not supported by the wide-column backend without a secondary index",
        ))
    }

    async fn set_id_floor(&self, floor: SchemaId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>("schema:next_id", (floor.saturating_sub(1)) as u64)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn is_subject_soft_deleted(&self, subject: &str) -> Result<bool> {
        let versions = self.list_raw_versions(subject).await?;
        if versions.is_empty() {
            return Ok(false);
        }
        for v in &versions {
            if let Some(sv) = self.get_subject_version(subject, *v).await? {
                if !sv.deleted {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn get_config(&self, subject: Option<&str>) -> Result<Option<Config>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::config_key(subject)).await.map_err(Error::storage)?;
        payload.map(|p| serde_json::from_str(&p).map_err(Error::storage)).transpose()
    }

    async fn set_config(&self, subject: Option<&str>, config: Config) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&config).map_err(Error::storage)?;
        conn.set::<_, _, ()>(Self::config_key(subject), payload).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_config(&self, subject: Option<&str>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::config_key(subject)).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn get_mode(&self, subject: Option<&str>) -> Result<Option<Mode>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::mode_key(subject)).await.map_err(Error::storage)?;
        payload.map(|p| p.parse().map_err(|_| Error::internal("corrupt mode value"))).transpose()
    }

    async fn set_mode(&self, subject: Option<&str>, mode: Mode) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::mode_key(subject), mode.to_string()).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_mode(&self, subject: Option<&str>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::mode_key(subject)).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn record_reference(&self, referencing_id: SchemaId, referenced_id: SchemaId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(Self::references_key(referenced_id), referencing_id)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn referencing_schema_ids(&self, id: SchemaId) -> Result<Vec<SchemaId>> {
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn.smembers(Self::references_key(id)).await.map_err(Error::storage)?;
        Ok(ids.into_iter().map(|v| v as SchemaId).collect())
    }
}

impl WideColumnStorage {
    async fn list_raw_versions(&self, subject: &str) -> Result<Vec<i32>> {
        let mut conn = self.conn.clone();
        let mut versions: Vec<i32> = conn
            .smembers(Self::subject_versions_set_key(subject))
            .await
            .map_err(Error::storage)?;
        versions.sort_unstable();
        Ok(versions)
    }
}
