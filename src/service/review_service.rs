use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::*,
    error::{AppError, Result},
    events::{InvalidationBus, InvalidationEvent},
    repository::{StudentRepository, SubmissionRepository, TemplateRepository},
    service::query_cache::SubmissionQueryCache,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub student_id: Uuid,
    pub template_id: Uuid,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdHocUploadRequest {
    pub kind: SubmissionKind,
    #[validate(nested)]
    pub file: FileMetadata,
}

/// Drives the review workflow against the backend.
///
/// Nothing is mutated locally: the local precondition check only decides
/// whether to call the backend at all, and every outcome is followed by an
/// invalidation so read models re-fetch the authoritative state.
pub struct ReviewService {
    submissions: Arc<dyn SubmissionRepository>,
    templates: Arc<dyn TemplateRepository>,
    students: Arc<dyn StudentRepository>,
    cache: Arc<SubmissionQueryCache>,
    bus: Arc<InvalidationBus>,
}

impl ReviewService {
    pub fn new(
        submissions: Arc<dyn SubmissionRepository>,
        templates: Arc<dyn TemplateRepository>,
        students: Arc<dyn StudentRepository>,
        cache: Arc<SubmissionQueryCache>,
        bus: Arc<InvalidationBus>,
    ) -> Self {
        Self {
            submissions,
            templates,
            students,
            cache,
            bus,
        }
    }

    /// A single submission, visible to its owner and their supervising instructor.
    pub async fn view(&self, viewer: &Viewer, id: Uuid) -> Result<Submission> {
        let submission = self.get(id).await?;
        self.authorize_reader(viewer, submission.owner_id).await?;
        Ok(submission)
    }

    async fn get(&self, id: Uuid) -> Result<Submission> {
        self.submissions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Submission {} not found", id)))
    }

    pub async fn list(&self, filter: SubmissionFilter) -> Result<Vec<Submission>> {
        self.cache.list(filter).await
    }

    pub async fn assign_from_template(&self, viewer: &Viewer, request: AssignRequest) -> Result<Submission> {
        self.authorize_supervisor(viewer, request.student_id).await?;
        self.require_active_template(request.template_id).await?;

        let existing = self
            .cache
            .list(SubmissionFilter::for_owner(request.student_id))
            .await?
            .into_iter()
            .find(|s| s.template_id == Some(request.template_id));
        if let Some(existing) = existing {
            if existing.status.next(ReviewAction::AssignFromTemplate).is_none() {
                return Err(self
                    .resync(
                        existing.owner_id,
                        AppError::InvalidState(format!(
                            "Template already assigned and {}",
                            existing.status
                        )),
                    )
                    .await);
            }
        }

        let result = self
            .submissions
            .assign_from_template(request.student_id, request.template_id, request.due_date)
            .await;
        self.finish(request.student_id, result).await
    }

    pub async fn submit_ad_hoc(&self, viewer: &Viewer, request: AdHocUploadRequest) -> Result<Submission> {
        request.validate()?;
        if viewer.role != ViewerRole::Student {
            return Err(AppError::Forbidden("Only students can upload submissions".to_string()));
        }

        let result = self
            .submissions
            .create_ad_hoc(viewer.id, request.kind, request.file)
            .await;
        self.finish(viewer.id, result).await
    }

    /// First upload of a pending requirement, or re-upload after review.
    pub async fn upload(&self, viewer: &Viewer, id: Uuid, file: FileMetadata) -> Result<Submission> {
        file.validate()?;
        let current = self.get(id).await?;
        if viewer.role != ViewerRole::Student || current.owner_id != viewer.id {
            return Err(AppError::Forbidden("Only the owning student can upload".to_string()));
        }

        if let Err(e) = current.upload(file.clone(), Utc::now()) {
            return Err(self.resync(current.owner_id, e).await);
        }

        let result = self.submissions.upload(id, file).await;
        self.finish(current.owner_id, result).await
    }

    pub async fn begin_review(&self, viewer: &Viewer, id: Uuid) -> Result<Submission> {
        let current = self.get(id).await?;
        self.authorize_supervisor(viewer, current.owner_id).await?;

        if let Err(e) = current.begin_review() {
            return Err(self.resync(current.owner_id, e).await);
        }

        let result = self.submissions.begin_review(id).await;
        self.finish(current.owner_id, result).await
    }

    pub async fn approve(&self, viewer: &Viewer, id: Uuid, note: Option<String>) -> Result<Submission> {
        let current = self.get(id).await?;
        self.authorize_supervisor(viewer, current.owner_id).await?;

        if let Err(e) = current.approve(note.as_deref(), Utc::now()) {
            return Err(self.resync(current.owner_id, e).await);
        }

        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let result = self.submissions.approve(id, note).await;
        self.finish(current.owner_id, result).await
    }

    pub async fn reject(&self, viewer: &Viewer, id: Uuid, reason: &str) -> Result<Submission> {
        // Input problems are reported before anything is fetched.
        let reason = normalize_reason(reason)?;
        let current = self.get(id).await?;
        self.authorize_supervisor(viewer, current.owner_id).await?;

        if let Err(e) = current.reject(&reason) {
            return Err(self.resync(current.owner_id, e).await);
        }

        let result = self.submissions.reject(id, reason).await;
        self.finish(current.owner_id, result).await
    }

    pub async fn set_due_date(
        &self,
        viewer: &Viewer,
        id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        let current = self.get(id).await?;
        self.authorize_supervisor(viewer, current.owner_id).await?;

        let result = self.submissions.set_due_date(id, due_date).await;
        self.finish(current.owner_id, result).await
    }

    /// Sets the due date of a student's requirement, assigning the template
    /// first when the student has no submission for it yet. One backend call.
    pub async fn ensure_assigned_then_set_due_date(
        &self,
        viewer: &Viewer,
        student_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        self.authorize_supervisor(viewer, student_id).await?;

        let result = self
            .submissions
            .ensure_assigned_with_due_date(student_id, template_id, due_date)
            .await;
        self.finish(student_id, result).await
    }

    pub async fn delete(&self, viewer: &Viewer, id: Uuid) -> Result<()> {
        let current = self.get(id).await?;
        self.authorize_supervisor(viewer, current.owner_id).await?;

        let result = self.submissions.delete(id).await;
        if let Err(e) = result {
            return Err(self.resync(current.owner_id, e).await);
        }

        tracing::info!("Deleted submission {} of student {}", id, current.owner_id);
        self.bus
            .publish(InvalidationEvent::Submissions { owner_id: current.owner_id })
            .await;
        Ok(())
    }

    /// Approved requirements over active templates.
    pub async fn completion(&self, viewer: &Viewer, student_id: Uuid) -> Result<CompletionRatio> {
        self.authorize_reader(viewer, student_id).await?;

        let templates = self.templates.list(false).await?;
        let submissions = self
            .cache
            .list(SubmissionFilter {
                owner_id: Some(student_id),
                kind: Some(SubmissionKind::Requirement),
                ..Default::default()
            })
            .await?;

        Ok(CompletionRatio::compute(&templates, &submissions))
    }

    /// Reviewable submissions of the instructor's students, oldest first.
    pub async fn review_queue(&self, viewer: &Viewer) -> Result<Vec<Submission>> {
        if viewer.role != ViewerRole::Instructor {
            return Err(AppError::Forbidden("Only instructors have a review queue".to_string()));
        }

        let mut queue = Vec::new();
        for student in self.students.list_by_instructor(viewer.id).await? {
            let submissions = self.cache.list(SubmissionFilter::for_owner(student.id)).await?;
            queue.extend(submissions.into_iter().filter(Submission::is_reviewable));
        }
        queue.sort_by_key(|s| s.submitted_date.unwrap_or(s.created_at));

        Ok(queue)
    }

    async fn authorize_reader(&self, viewer: &Viewer, student_id: Uuid) -> Result<()> {
        match viewer.role {
            ViewerRole::Student if viewer.id == student_id => Ok(()),
            ViewerRole::Student => Err(AppError::Forbidden(
                "Students can only view their own submissions".to_string(),
            )),
            _ => self.authorize_supervisor(viewer, student_id).await,
        }
    }

    async fn authorize_supervisor(&self, viewer: &Viewer, student_id: Uuid) -> Result<()> {
        if viewer.role != ViewerRole::Instructor {
            return Err(AppError::Forbidden("Only instructors can review submissions".to_string()));
        }

        let student = self
            .students
            .find_by_id(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Student {} not found", student_id)))?;

        if !student.is_supervised_by(viewer.id) {
            return Err(AppError::Forbidden(format!(
                "Instructor {} does not supervise student {}",
                viewer.id, student_id
            )));
        }
        Ok(())
    }

    async fn require_active_template(&self, template_id: Uuid) -> Result<RequirementTemplate> {
        match self.templates.find_by_id(template_id).await? {
            Some(template) if template.active => Ok(template),
            Some(_) => Err(AppError::Validation(format!(
                "Template {} is no longer active",
                template_id
            ))),
            None => Err(AppError::Validation(format!("Unknown template {}", template_id))),
        }
    }

    /// The local view was stale; ask read models to re-fetch and hand the error back.
    async fn resync(&self, owner_id: Uuid, error: AppError) -> AppError {
        if error.requires_resync() {
            tracing::info!("Resyncing submissions of {} after: {}", owner_id, error);
            self.bus
                .publish(InvalidationEvent::Submissions { owner_id })
                .await;
        }
        error
    }

    async fn finish(&self, owner_id: Uuid, result: Result<Submission>) -> Result<Submission> {
        let submission = match result {
            Ok(submission) => submission,
            Err(e) => return Err(self.resync(owner_id, e).await),
        };

        if let Err(e) = submission.check_invariants() {
            tracing::warn!("Backend returned inconsistent submission: {}", e);
        }

        tracing::info!(
            "Submission {} of student {} is now {}",
            submission.id,
            submission.owner_id,
            submission.status
        );
        self.bus
            .publish(InvalidationEvent::Submissions { owner_id })
            .await;
        self.bus
            .publish(InvalidationEvent::Stream(StreamType::Requirement))
            .await;

        Ok(submission)
    }
}
