use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod http_repository;
pub mod memory_repository;
pub mod key_value_store;

pub use http_repository::HttpBackend;
pub use memory_repository::InMemoryBackend;
pub use key_value_store::{InMemoryKeyValueStore, SqliteKeyValueStore};

/// Submission endpoints of the practicum backend. The backend is the
/// authority on status; every mutation returns the entity it stored.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Submission>>;
    async fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>>;
    async fn assign_from_template(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission>;
    async fn create_ad_hoc(
        &self,
        owner_id: Uuid,
        kind: SubmissionKind,
        file: FileMetadata,
    ) -> Result<Submission>;
    async fn upload(&self, id: Uuid, file: FileMetadata) -> Result<Submission>;
    async fn begin_review(&self, id: Uuid) -> Result<Submission>;
    async fn approve(&self, id: Uuid, note: Option<String>) -> Result<Submission>;
    async fn reject(&self, id: Uuid, reason: String) -> Result<Submission>;
    async fn set_due_date(&self, id: Uuid, due_date: Option<DateTime<Utc>>) -> Result<Submission>;
    /// Assigns the template to the student if needed and applies the due
    /// date in a single backend call.
    async fn ensure_assigned_with_due_date(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RequirementTemplate>>;
    async fn list(&self, include_inactive: bool) -> Result<Vec<RequirementTemplate>>;
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Student>>;
    async fn list_by_instructor(&self, instructor_id: Uuid) -> Result<Vec<Student>>;
}

/// Full collection behind one notification stream, as visible to `viewer`.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn fetch(&self, viewer: &Viewer, stream: StreamType) -> Result<Vec<NotificationItem>>;
}

/// Device-local key-value medium for read-state records.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}
