//! Transactional `sqlx`/Postgres storage backend.
//!
//! Every mutating operation runs inside a single transaction with
//! `SELECT ... FOR UPDATE` row locks where a read-modify-write is involved
//! (version allocation, soft/permanent delete), so the three storage
//! guarantees fall out of Postgres's own transaction isolation rather than
//! anything bespoke: `UNIQUE` constraints on `schemas.fingerprint`,
//! `schemas.id` and `subject_versions(subject, version)` make the
//! compare-and-swap and dense-allocation guarantees enforceable by the
//! database itself, and read-committed reads against a committed transaction
//! give read-your-writes across any number of registry instances pointed at
//! the same database.
//!
//! `migrations/` (applied via `sqlx::migrate!`) creates the schema this
//! module assumes exists.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::model::{Config, Mode, Schema, SchemaId, SubjectVersion};
use crate::storage::{InsertOutcome, Storage};
use crate::{Error, Result};

pub struct SqlStorage {
    pool: PgPool,
}

impl SqlStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(Error::storage)?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(Error::storage)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_schema(row: &sqlx::postgres::PgRow) -> Result<Schema> {
    let fingerprint_hex: String = row.try_get("fingerprint").map_err(Error::storage)?;
    let fingerprint: [u8; 32] = hex::decode(&fingerprint_hex)
        .map_err(Error::storage)?
        .try_into()
        .map_err(|_| Error::internal("fingerprint column is not 32 bytes"))?;
    let references_json: serde_json::Value = row.try_get("references").map_err(Error::storage)?;
    let references = serde_json::from_value(references_json).map_err(Error::storage)?;
    let schema_type_str: String = row.try_get("schema_type").map_err(Error::storage)?;

    Ok(Schema {
        id: row.try_get::<i64, _>("id").map_err(Error::storage)? as SchemaId,
        schema_type: schema_type_str.parse().map_err(|_| Error::internal("corrupt schema_type column"))?,
        content: row.try_get("content").map_err(Error::storage)?,
        fingerprint,
        references,
    })
}

fn row_to_subject_version(row: &sqlx::postgres::PgRow) -> Result<SubjectVersion> {
    let metadata_json: Option<serde_json::Value> = row.try_get("metadata").map_err(Error::storage)?;
    let metadata = metadata_json.map(serde_json::from_value).transpose().map_err(Error::storage)?;

    Ok(SubjectVersion {
        subject: row.try_get("subject").map_err(Error::storage)?,
        version: row.try_get("version").map_err(Error::storage)?,
        schema_id: row.try_get::<i64, _>("schema_id").map_err(Error::storage)? as SchemaId,
        deleted: row.try_get("deleted").map_err(Error::storage)?,
        metadata,
        rule_set: row.try_get("rule_set").map_err(Error::storage)?,
    })
}

#[async_trait]
impl Storage for SqlStorage {
    async fn next_schema_id(&self) -> Result<SchemaId> {
        let row = sqlx::query("SELECT nextval('schema_id_seq') AS id")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(row.try_get::<i64, _>("id").map_err(Error::storage)? as SchemaId)
    }

    async fn lookup_by_fingerprint(&self, fingerprint: &[u8; 32]) -> Result<Option<SchemaId>> {
        let hex = hex::encode(fingerprint);
        let row = sqlx::query("SELECT id FROM schemas WHERE fingerprint = $1")
            .bind(hex)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(row.map(|r| r.get::<i64, _>("id") as SchemaId))
    }

    async fn insert_schema(&self, id: SchemaId, schema: &Schema) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let hex = hex::encode(schema.fingerprint);

        let existing = sqlx::query("SELECT id FROM schemas WHERE fingerprint = $1 FOR UPDATE")
            .bind(&hex)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::storage)?;
        if let Some(row) = existing {
            return Ok(InsertOutcome::Existing(row.get::<i64, _>("id") as SchemaId));
        }

        sqlx::query(
            "INSERT INTO schemas (id, schema_type, content, fingerprint, references_json) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id as i64)
        .bind(schema.schema_type.to_string())
        .bind(&schema.content)
        .bind(&hex)
        .bind(serde_json::to_value(&schema.references).map_err(Error::storage)?)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        let row = sqlx::query("SELECT id, schema_type, content, fingerprint, references_json AS \"references\" FROM schemas WHERE id = $1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        row.as_ref().map(row_to_schema).transpose()
    }

    async fn allocate_version(&self, subject: &str, hint: Option<i32>) -> Result<i32> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max_version FROM subject_versions \
             WHERE subject = $1 FOR UPDATE",
        )
        .bind(subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::storage)?;
        let next = row.try_get::<i32, _>("max_version").map_err(Error::storage)? + 1;
        tx.commit().await.map_err(Error::storage)?;
        Ok(match hint {
            Some(h) if h == next => h,
            _ => next,
        })
    }

    async fn put_subject_version(&self, subject_version: SubjectVersion) -> Result<()> {
        sqlx::query(
            "INSERT INTO subject_versions (subject, version, schema_id, deleted, metadata, rule_set) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (subject, version) DO UPDATE SET schema_id = EXCLUDED.schema_id, \
             deleted = EXCLUDED.deleted, metadata = EXCLUDED.metadata, rule_set = EXCLUDED.rule_set",
        )
        .bind(&subject_version.subject)
        .bind(subject_version.version)
        .bind(subject_version.schema_id as i64)
        .bind(subject_version.deleted)
        .bind(subject_version.metadata.map(|m| serde_json::to_value(m).unwrap()))
        .bind(subject_version.rule_set)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Option<SubjectVersion>> {
        let row = sqlx::query(
            "SELECT subject, version, schema_id, deleted, metadata, rule_set FROM subject_versions \
             WHERE subject = $1 AND version = $2",
        )
        .bind(subject)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        row.as_ref().map(row_to_subject_version).transpose()
    }

    async fn get_latest_subject_version(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Option<SubjectVersion>> {
        let row = sqlx::query(
            "SELECT subject, version, schema_id, deleted, metadata, rule_set FROM subject_versions \
             WHERE subject = $1 AND (deleted = false OR $2) ORDER BY version DESC LIMIT 1",
        )
        .bind(subject)
        .bind(include_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        row.as_ref().map(row_to_subject_version).transpose()
    }

    async fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<i32>> {
        let rows = sqlx::query(
            "SELECT version FROM subject_versions WHERE subject = $1 AND (deleted = false OR $2) ORDER BY version",
        )
        .bind(subject)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(|r| r.try_get::<i32, _>("version").map_err(Error::storage)).collect()
    }

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT subject FROM subject_versions WHERE deleted = false OR $1 ORDER BY subject",
        )
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(|r| r.try_get("subject").map_err(Error::storage)).collect()
    }

    async fn active_versions(&self, subject: &str) -> Result<Vec<SubjectVersion>> {
        let rows = sqlx::query(
            "SELECT subject, version, schema_id, deleted, metadata, rule_set FROM subject_versions \
             WHERE subject = $1 AND deleted = false ORDER BY version",
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(row_to_subject_version).collect()
    }

    async fn find_subject_versions_by_schema_id(&self, subject: &str, id: SchemaId) -> Result<Vec<i32>> {
        let rows = sqlx::query(
            "SELECT version FROM subject_versions WHERE subject = $1 AND schema_id = $2 AND deleted = false ORDER BY version",
        )
        .bind(subject)
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(|r| r.try_get::<i32, _>("version").map_err(Error::storage)).collect()
    }

    async fn soft_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        let result = sqlx::query("UPDATE subject_versions SET deleted = true WHERE subject = $1 AND version = $2")
            .bind(subject)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            });
        }
        Ok(())
    }

    async fn permanent_delete_version(&self, subject: &str, version: i32) -> Result<()> {
        sqlx::query("DELETE FROM subject_versions WHERE subject = $1 AND version = $2")
            .bind(subject)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn soft_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, false).await?;
        sqlx::query("UPDATE subject_versions SET deleted = true WHERE subject = $1 AND deleted = false")
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(versions)
    }

    async fn permanent_delete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, true).await?;
        sqlx::query("DELETE FROM subject_versions WHERE subject = $1")
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(versions)
    }

    async fn undelete_version(&self, subject: &str, version: i32) -> Result<()> {
        let result = sqlx::query("UPDATE subject_versions SET deleted = false WHERE subject = $1 AND version = $2")
            .bind(subject)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            });
        }
        Ok(())
    }

    async fn undelete_subject(&self, subject: &str) -> Result<Vec<i32>> {
        let versions = self.list_versions(subject, true).await?;
        sqlx::query("UPDATE subject_versions SET deleted = false WHERE subject = $1")
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(versions)
    }

    async fn subjects_for_schema_id(&self, id: SchemaId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT subject FROM subject_versions WHERE schema_id = $1 AND deleted = false ORDER BY subject",
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(|r| r.try_get("subject").map_err(Error::storage)).collect()
    }

    async fn set_id_floor(&self, floor: SchemaId) -> Result<()> {
        sqlx::query("SELECT setval('schema_id_seq', GREATEST($1 - 1, 0))")
            .bind(floor as i64)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn is_subject_soft_deleted(&self, subject: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE NOT deleted) AS active, COUNT(*) AS total \
             FROM subject_versions WHERE subject = $1",
        )
        .bind(subject)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)?;
        let active: i64 = row.try_get("active").map_err(Error::storage)?;
        let total: i64 = row.try_get("total").map_err(Error::storage)?;
        Ok(total > 0 && active == 0)
    }

    async fn get_config(&self, subject: Option<&str>) -> Result<Option<Config>> {
        let row = sqlx::query("SELECT config FROM configs WHERE subject = $1")
            .bind(subject.unwrap_or(""))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        row.map(|r| {
            let v: serde_json::Value = r.try_get("config").map_err(Error::storage)?;
            serde_json::from_value(v).map_err(Error::storage)
        })
        .transpose()
    }

    async fn set_config(&self, subject: Option<&str>, config: Config) -> Result<()> {
        sqlx::query(
            "INSERT INTO configs (subject, config) VALUES ($1, $2) \
             ON CONFLICT (subject) DO UPDATE SET config = EXCLUDED.config",
        )
        .bind(subject.unwrap_or(""))
        .bind(serde_json::to_value(config).map_err(Error::storage)?)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_config(&self, subject: Option<&str>) -> Result<()> {
        sqlx::query("DELETE FROM configs WHERE subject = $1")
            .bind(subject.unwrap_or(""))
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn get_mode(&self, subject: Option<&str>) -> Result<Option<Mode>> {
        let row = sqlx::query("SELECT mode FROM modes WHERE subject = $1")
            .bind(subject.unwrap_or(""))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        row.map(|r| {
            let v: String = r.try_get("mode").map_err(Error::storage)?;
            v.parse().map_err(|_| Error::internal("corrupt mode column"))
        })
        .transpose()
    }

    async fn set_mode(&self, subject: Option<&str>, mode: Mode) -> Result<()> {
        sqlx::query(
            "INSERT INTO modes (subject, mode) VALUES ($1, $2) \
             ON CONFLICT (subject) DO UPDATE SET mode = EXCLUDED.mode",
        )
        .bind(subject.unwrap_or(""))
        .bind(mode.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_mode(&self, subject: Option<&str>) -> Result<()> {
        sqlx::query("DELETE FROM modes WHERE subject = $1")
            .bind(subject.unwrap_or(""))
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn record_reference(&self, referencing_id: SchemaId, referenced_id: SchemaId) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_references (referencing_id, referenced_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(referencing_id as i64)
        .bind(referenced_id as i64)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn referencing_schema_ids(&self, id: SchemaId) -> Result<Vec<SchemaId>> {
        let rows = sqlx::query("SELECT referencing_id FROM schema_references WHERE referenced_id = $1")
            .bind(id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("referencing_id").map(|v| v as SchemaId).map_err(Error::storage))
            .collect()
    }
}
