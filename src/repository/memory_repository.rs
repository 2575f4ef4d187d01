use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{NotificationSource, StudentRepository, SubmissionRepository, TemplateRepository},
};

#[derive(Default)]
struct BackendState {
    submissions: HashMap<Uuid, Submission>,
    templates: HashMap<Uuid, RequirementTemplate>,
    students: HashMap<Uuid, Student>,
    streams: HashMap<StreamType, Vec<NotificationItem>>,
    failing_streams: HashSet<StreamType>,
    offline: bool,
}

impl BackendState {
    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(AppError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn submission(&self, id: Uuid) -> Result<&Submission> {
        self.submissions
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Submission {} not found", id)))
    }

    fn active_template(&self, template_id: Uuid) -> Result<&RequirementTemplate> {
        match self.templates.get(&template_id) {
            Some(template) if template.active => Ok(template),
            Some(_) => Err(AppError::Validation(format!(
                "Template {} is no longer active",
                template_id
            ))),
            None => Err(AppError::NotFound(format!("Template {} not found", template_id))),
        }
    }

    fn find_assignment(&self, owner_id: Uuid, template_id: Uuid) -> Option<&Submission> {
        self.submissions
            .values()
            .find(|s| s.owner_id == owner_id && s.template_id == Some(template_id))
    }

    /// Runs `transition` against a copy and stores it only on success.
    fn apply<F>(&mut self, id: Uuid, transition: F) -> Result<Submission>
    where
        F: FnOnce(&Submission) -> Result<Submission>,
    {
        let next = transition(self.submission(id)?)?;
        self.submissions.insert(id, next.clone());
        Ok(next)
    }
}

/// Backend that keeps everything in process memory and enforces the review
/// workflow the way the remote server does. Used for tests and offline demos.
#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_template(&self, template: RequirementTemplate) {
        self.state.write().await.templates.insert(template.id, template);
    }

    pub async fn insert_student(&self, student: Student) {
        self.state.write().await.students.insert(student.id, student);
    }

    pub async fn insert_submission(&self, submission: Submission) {
        self.state
            .write()
            .await
            .submissions
            .insert(submission.id, submission);
    }

    pub async fn push_item(&self, stream: StreamType, item: NotificationItem) {
        self.state
            .write()
            .await
            .streams
            .entry(stream)
            .or_default()
            .push(item);
    }

    /// Makes fetches of `stream` fail until cleared.
    pub async fn set_stream_failing(&self, stream: StreamType, failing: bool) {
        let mut state = self.state.write().await;
        if failing {
            state.failing_streams.insert(stream);
        } else {
            state.failing_streams.remove(&stream);
        }
    }

    pub async fn set_offline(&self, offline: bool) {
        self.state.write().await.offline = offline;
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Submission>> {
        let state = self.state.read().await;
        state.check_online()?;
        Ok(state.submissions.get(&id).cloned())
    }

    async fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        let state = self.state.read().await;
        state.check_online()?;
        let mut submissions: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        submissions.sort_by_key(|s| s.created_at);
        Ok(submissions)
    }

    async fn assign_from_template(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        let template_due = state.active_template(template_id)?.default_due_date;

        if let Some(existing) = state.find_assignment(owner_id, template_id) {
            if existing.status != SubmissionStatus::Pending {
                return Err(AppError::InvalidState(format!(
                    "Template already assigned and {}",
                    existing.status
                )));
            }
            let id = existing.id;
            return state.apply(id, |s| Ok(s.with_due_date(due_date.or(s.due_date))));
        }

        let submission = Submission::assigned(owner_id, template_id, due_date.or(template_due), Utc::now());
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn create_ad_hoc(
        &self,
        owner_id: Uuid,
        kind: SubmissionKind,
        file: FileMetadata,
    ) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        let submission = Submission::ad_hoc(owner_id, kind, file, Utc::now());
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn upload(&self, id: Uuid, file: FileMetadata) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state.apply(id, |s| s.upload(file, Utc::now()))
    }

    async fn begin_review(&self, id: Uuid) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state.apply(id, Submission::begin_review)
    }

    async fn approve(&self, id: Uuid, note: Option<String>) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state.apply(id, |s| s.approve(note.as_deref(), Utc::now()))
    }

    async fn reject(&self, id: Uuid, reason: String) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state.apply(id, |s| s.reject(&reason))
    }

    async fn set_due_date(&self, id: Uuid, due_date: Option<DateTime<Utc>>) -> Result<Submission> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state.apply(id, |s| Ok(s.with_due_date(due_date)))
    }

    async fn ensure_assigned_with_due_date(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        // Single write guard: nobody observes the assignment without its date.
        let mut state = self.state.write().await;
        state.check_online()?;

        if let Some(existing) = state.find_assignment(owner_id, template_id) {
            let id = existing.id;
            return state.apply(id, |s| Ok(s.with_due_date(due_date)));
        }

        state.active_template(template_id)?;
        let submission = Submission::assigned(owner_id, template_id, due_date, Utc::now());
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_online()?;
        state
            .submissions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Submission {} not found", id)))
    }
}

#[async_trait]
impl TemplateRepository for InMemoryBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RequirementTemplate>> {
        let state = self.state.read().await;
        state.check_online()?;
        Ok(state.templates.get(&id).cloned())
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<RequirementTemplate>> {
        let state = self.state.read().await;
        state.check_online()?;
        let mut templates: Vec<RequirementTemplate> = state
            .templates
            .values()
            .filter(|t| include_inactive || t.active)
            .cloned()
            .collect();
        templates.sort_by_key(|t| t.created_at);
        Ok(templates)
    }
}

#[async_trait]
impl StudentRepository for InMemoryBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Student>> {
        let state = self.state.read().await;
        state.check_online()?;
        Ok(state.students.get(&id).cloned())
    }

    async fn list_by_instructor(&self, instructor_id: Uuid) -> Result<Vec<Student>> {
        let state = self.state.read().await;
        state.check_online()?;
        Ok(state
            .students
            .values()
            .filter(|s| s.is_supervised_by(instructor_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationSource for InMemoryBackend {
    async fn fetch(&self, _viewer: &Viewer, stream: StreamType) -> Result<Vec<NotificationItem>> {
        let state = self.state.read().await;
        state.check_online()?;
        if state.failing_streams.contains(&stream) {
            return Err(AppError::Server {
                code: "SERVER_ERROR".to_string(),
                message: format!("{} feed unavailable", stream),
            });
        }
        Ok(state.streams.get(&stream).cloned().unwrap_or_default())
    }
}
