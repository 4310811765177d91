//! Storage abstraction (component C).
//!
//! A backend only has to uphold three guarantees, regardless of how it's
//! implemented: fingerprint lookup is a compare-and-swap (two callers racing
//! to register the same content must converge on one schema id), per-subject
//! version numbers are dense starting at 1, and a write observed to succeed
//! is visible to the next read from *any* instance (read-your-writes), not
//! just the instance that performed the write. [`memory`] gives up the third
//! guarantee across processes in exchange for zero setup cost; [`sql`] and
//! [`wide_column`] keep it by construction.
//!
//! Everything here is `Send + Sync` and the trait is `async` via
//! `async-trait`, following the same pattern the registry's HTTP client uses
//! for the handful of network calls it makes.

#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-sql")]
pub mod sql;
#[cfg(feature = "storage-wide-column")]
pub mod wide_column;

use async_trait::async_trait;

use crate::model::{Config, Mode, Schema, SchemaId, SubjectVersion};
use crate::Result;

/// Outcome of a content-addressed insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another caller already registered this exact fingerprint under this id.
    Existing(SchemaId),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Allocate the next globally unique schema id. Ids are never reused,
    /// including after a permanent delete.
    async fn next_schema_id(&self) -> Result<SchemaId>;

    /// Look up an existing schema id by its content fingerprint, independent
    /// of any subject. Fingerprints are global: two subjects that register
    /// byte-identical schemas share the same id.
    async fn lookup_by_fingerprint(&self, fingerprint: &[u8; 32]) -> Result<Option<SchemaId>>;

    /// Insert `schema` under `id` if no schema with this fingerprint exists
    /// yet. Concurrent callers racing on the same fingerprint must all
    /// observe the same winning id.
    async fn insert_schema(&self, id: SchemaId, schema: &Schema) -> Result<InsertOutcome>;

    async fn get_schema(&self, id: SchemaId) -> Result<Option<Schema>>;

    async fn schema_exists(&self, id: SchemaId) -> Result<bool> {
        Ok(self.get_schema(id).await?.is_some())
    }

    /// Allocate the version number for a new registration on `subject`.
    /// Versions are dense starting at 1; `hint` is the optimistic
    /// `confluent:version` metadata value the caller asked for, honored only
    /// when it is exactly the next free slot.
    async fn allocate_version(&self, subject: &str, hint: Option<i32>) -> Result<i32>;

    async fn put_subject_version(&self, subject_version: SubjectVersion) -> Result<()>;

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Option<SubjectVersion>>;

    /// The highest version number for `subject`. When `include_deleted` is
    /// false, soft-deleted versions are skipped.
    async fn get_latest_subject_version(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Option<SubjectVersion>>;

    async fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<i32>>;

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>>;

    async fn subject_exists(&self, subject: &str, include_deleted: bool) -> Result<bool> {
        Ok(!self.list_versions(subject, include_deleted).await?.is_empty())
    }

    /// All non-deleted versions for `subject`, in version order — the set a
    /// compatibility check runs the candidate against.
    async fn active_versions(&self, subject: &str) -> Result<Vec<SubjectVersion>>;

    /// Versions of `subject` currently bound to schema `id` (used to make
    /// re-registering byte-identical content under a subject idempotent).
    async fn find_subject_versions_by_schema_id(&self, subject: &str, id: SchemaId) -> Result<Vec<i32>>;

    async fn soft_delete_version(&self, subject: &str, version: i32) -> Result<()>;

    async fn permanent_delete_version(&self, subject: &str, version: i32) -> Result<()>;

    /// Soft-delete every active version of `subject`, returning the versions
    /// affected.
    async fn soft_delete_subject(&self, subject: &str) -> Result<Vec<i32>>;

    /// Permanently delete `subject` and all its versions, returning the
    /// versions affected. The subject must already be fully soft-deleted.
    async fn permanent_delete_subject(&self, subject: &str) -> Result<Vec<i32>>;

    /// Reverse a soft delete. A no-op on observable state for anything other
    /// than the `deleted` flag itself.
    async fn undelete_version(&self, subject: &str, version: i32) -> Result<()>;

    async fn undelete_subject(&self, subject: &str) -> Result<Vec<i32>>;

    async fn is_subject_soft_deleted(&self, subject: &str) -> Result<bool>;

    /// Subjects with at least one (non-deleted) version bound to `id`.
    async fn subjects_for_schema_id(&self, id: SchemaId) -> Result<Vec<String>>;

    /// Advance the id allocator so it never hands out an id below `floor`.
    /// Used after a bulk import to reserve the ids it assigned explicitly.
    async fn set_id_floor(&self, floor: SchemaId) -> Result<()>;

    /// `subject = None` addresses the global config/mode record.
    async fn get_config(&self, subject: Option<&str>) -> Result<Option<Config>>;

    async fn set_config(&self, subject: Option<&str>, config: Config) -> Result<()>;

    async fn delete_config(&self, subject: Option<&str>) -> Result<()>;

    async fn get_mode(&self, subject: Option<&str>) -> Result<Option<Mode>>;

    async fn set_mode(&self, subject: Option<&str>, mode: Mode) -> Result<()>;

    async fn delete_mode(&self, subject: Option<&str>) -> Result<()>;

    /// Record that `referencing_id` declares a reference to `referenced_id`,
    /// maintained so deletes can refuse to remove a schema still in use.
    async fn record_reference(&self, referencing_id: SchemaId, referenced_id: SchemaId) -> Result<()>;

    async fn referencing_schema_ids(&self, id: SchemaId) -> Result<Vec<SchemaId>>;
}
