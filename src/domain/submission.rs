use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::ViewerRole;
use crate::error::{AppError, Result};

/// A Requirement or Report tracked through the review workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub kind: SubmissionKind,
    pub owner_id: Uuid,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file: Option<FileMetadata>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionKind {
    Requirement,
    Report,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    InProgress,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[validate(length(min = 1, message = "file name is required"))]
    pub file_name: String,
    #[validate(length(min = 1, message = "file url is required"))]
    pub file_url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

/// List query parameters; also the key under which list results are cached.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFilter {
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<SubmissionStatus>,
    #[serde(default)]
    pub kind: Option<SubmissionKind>,
}

impl SubmissionFilter {
    pub fn for_owner(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, submission: &Submission) -> bool {
        self.owner_id.map_or(true, |id| id == submission.owner_id)
            && self.status.map_or(true, |s| s == submission.status)
            && self.kind.map_or(true, |k| k == submission.kind)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewAction {
    AssignFromTemplate,
    Upload,
    BeginReview,
    Approve,
    Reject,
    Reupload,
    Delete,
}

impl ReviewAction {
    /// Role permitted to perform the action.
    pub fn actor(self) -> ViewerRole {
        match self {
            ReviewAction::Upload | ReviewAction::Reupload => ViewerRole::Student,
            ReviewAction::AssignFromTemplate
            | ReviewAction::BeginReview
            | ReviewAction::Approve
            | ReviewAction::Reject
            | ReviewAction::Delete => ViewerRole::Instructor,
        }
    }
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::InProgress => "in-progress",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// Statuses from which an instructor may approve or reject.
    pub fn is_reviewable(self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::InProgress)
    }

    /// Target status of `action` from `self`, or `None` when the move is illegal.
    pub fn next(self, action: ReviewAction) -> Option<SubmissionStatus> {
        use SubmissionStatus::*;
        match (self, action) {
            (Pending, ReviewAction::AssignFromTemplate) => Some(Pending),
            (Pending, ReviewAction::Upload) => Some(Submitted),
            (Submitted, ReviewAction::BeginReview) => Some(InProgress),
            (Submitted | InProgress, ReviewAction::Approve) => Some(Approved),
            (Submitted | InProgress, ReviewAction::Reject) => Some(Rejected),
            (Approved | Rejected, ReviewAction::Reupload) => Some(Submitted),
            (status, ReviewAction::Delete) => Some(status),
            _ => None,
        }
    }

    /// Actions the given role may trigger from this status, for UI gating.
    pub fn allowed_actions(self, role: ViewerRole) -> Vec<ReviewAction> {
        [
            ReviewAction::AssignFromTemplate,
            ReviewAction::Upload,
            ReviewAction::BeginReview,
            ReviewAction::Approve,
            ReviewAction::Reject,
            ReviewAction::Reupload,
            ReviewAction::Delete,
        ]
        .into_iter()
        .filter(|action| action.actor() == role && self.next(*action).is_some())
        .collect()
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn illegal(status: SubmissionStatus, action: ReviewAction) -> AppError {
    AppError::InvalidState(format!(
        "cannot {:?} a submission that is {}",
        action, status
    ))
}

/// Trimmed, non-empty rejection reason.
pub fn normalize_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(
            "a reason is required to reject a submission".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

// Transitions return a new value; `self` is never touched, so a failure
// leaves the caller's copy exactly as it was.
impl Submission {
    pub fn assigned(
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: SubmissionKind::Requirement,
            owner_id,
            template_id: Some(template_id),
            status: SubmissionStatus::Pending,
            due_date,
            submitted_date: None,
            approved_date: None,
            file: None,
            feedback: None,
            created_at: at,
        }
    }

    pub fn ad_hoc(
        owner_id: Uuid,
        kind: SubmissionKind,
        file: FileMetadata,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            template_id: None,
            status: SubmissionStatus::Submitted,
            due_date: None,
            submitted_date: Some(at),
            approved_date: None,
            file: Some(file),
            feedback: None,
            created_at: at,
        }
    }

    pub fn is_reviewable(&self) -> bool {
        self.status.is_reviewable()
    }

    /// Upload from `pending`, or re-upload after approval/rejection.
    pub fn upload(&self, file: FileMetadata, at: DateTime<Utc>) -> Result<Submission> {
        let action = match self.status {
            SubmissionStatus::Pending => ReviewAction::Upload,
            _ => ReviewAction::Reupload,
        };
        let status = self
            .status
            .next(action)
            .ok_or_else(|| illegal(self.status, action))?;

        Ok(Submission {
            status,
            submitted_date: Some(at),
            approved_date: None,
            file: Some(file),
            ..self.clone()
        })
    }

    pub fn begin_review(&self) -> Result<Submission> {
        let status = self
            .status
            .next(ReviewAction::BeginReview)
            .ok_or_else(|| illegal(self.status, ReviewAction::BeginReview))?;

        Ok(Submission {
            status,
            ..self.clone()
        })
    }

    pub fn approve(&self, note: Option<&str>, at: DateTime<Utc>) -> Result<Submission> {
        let status = self
            .status
            .next(ReviewAction::Approve)
            .ok_or_else(|| illegal(self.status, ReviewAction::Approve))?;

        let feedback = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(Submission {
            status,
            approved_date: Some(at),
            feedback,
            ..self.clone()
        })
    }

    pub fn reject(&self, reason: &str) -> Result<Submission> {
        let reason = normalize_reason(reason)?;
        let status = self
            .status
            .next(ReviewAction::Reject)
            .ok_or_else(|| illegal(self.status, ReviewAction::Reject))?;

        Ok(Submission {
            status,
            approved_date: None,
            feedback: Some(reason),
            ..self.clone()
        })
    }

    pub fn with_due_date(&self, due_date: Option<DateTime<Utc>>) -> Submission {
        Submission {
            due_date,
            ..self.clone()
        }
    }

    /// `approvedDate` set iff approved; rejected carries non-empty feedback.
    pub fn check_invariants(&self) -> Result<()> {
        let approved = self.status == SubmissionStatus::Approved;
        if approved != self.approved_date.is_some() {
            return Err(AppError::Internal(format!(
                "submission {} is {} but approved date is {:?}",
                self.id, self.status, self.approved_date
            )));
        }
        if self.status == SubmissionStatus::Rejected
            && self.feedback.as_deref().map_or(true, |f| f.trim().is_empty())
        {
            return Err(AppError::Internal(format!(
                "submission {} is rejected without feedback",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileMetadata {
        FileMetadata {
            file_name: name.to_string(),
            file_url: format!("https://files.example/{}", name),
            content_type: Some("application/pdf".to_string()),
            size_bytes: Some(1024),
        }
    }

    fn submitted() -> Submission {
        Submission::ad_hoc(Uuid::new_v4(), SubmissionKind::Requirement, file("moa.pdf"), Utc::now())
    }

    const ALL: [SubmissionStatus; 5] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Submitted,
        SubmissionStatus::InProgress,
        SubmissionStatus::Approved,
        SubmissionStatus::Rejected,
    ];

    #[test]
    fn reject_with_blank_reason_is_validation_error() {
        let sub = submitted();
        let err = sub.reject("   ").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(sub.status, SubmissionStatus::Submitted);
    }

    #[test]
    fn reject_sets_feedback_and_clears_approval() {
        let sub = submitted();
        let rejected = sub.reject("Missing signature").unwrap();
        assert_eq!(rejected.status, SubmissionStatus::Rejected);
        assert_eq!(rejected.feedback.as_deref(), Some("Missing signature"));
        assert!(rejected.approved_date.is_none());
        rejected.check_invariants().unwrap();
    }

    #[test]
    fn approve_and_reject_outside_reviewable_states_fail() {
        for status in ALL.into_iter().filter(|s| !s.is_reviewable()) {
            let sub = Submission {
                status,
                approved_date: (status == SubmissionStatus::Approved).then(Utc::now),
                feedback: (status == SubmissionStatus::Rejected).then(|| "redo".to_string()),
                ..submitted()
            };
            let before = sub.clone();

            assert!(matches!(sub.approve(None, Utc::now()), Err(AppError::InvalidState(_))));
            assert!(matches!(sub.reject("nope"), Err(AppError::InvalidState(_))));
            assert_eq!(sub, before);
        }
    }

    #[test]
    fn approve_from_in_progress_sets_date_and_note() {
        let sub = submitted().begin_review().unwrap();
        assert_eq!(sub.status, SubmissionStatus::InProgress);

        let approved = sub.approve(Some(" Well done "), Utc::now()).unwrap();
        assert_eq!(approved.status, SubmissionStatus::Approved);
        assert_eq!(approved.feedback.as_deref(), Some("Well done"));
        approved.check_invariants().unwrap();

        let plain = sub.approve(None, Utc::now()).unwrap();
        assert!(plain.feedback.is_none());
    }

    #[test]
    fn reupload_after_rejection_returns_to_submitted() {
        let rejected = submitted().reject("Blurry scan").unwrap();
        let again = rejected.upload(file("moa-v2.pdf"), Utc::now()).unwrap();
        assert_eq!(again.status, SubmissionStatus::Submitted);
        assert_eq!(again.file.unwrap().file_name, "moa-v2.pdf");
        assert!(again.approved_date.is_none());
    }

    #[test]
    fn reupload_after_approval_resets_approved_date() {
        let approved = submitted().approve(None, Utc::now()).unwrap();
        let again = approved.upload(file("moa-v3.pdf"), Utc::now()).unwrap();
        assert_eq!(again.status, SubmissionStatus::Submitted);
        assert!(again.approved_date.is_none());
        again.check_invariants().unwrap();
    }

    #[test]
    fn upload_while_awaiting_review_is_rejected() {
        let sub = submitted();
        assert!(matches!(
            sub.upload(file("other.pdf"), Utc::now()),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn allowed_actions_gate_by_role() {
        assert_eq!(
            SubmissionStatus::Submitted.allowed_actions(ViewerRole::Instructor),
            vec![
                ReviewAction::BeginReview,
                ReviewAction::Approve,
                ReviewAction::Reject,
                ReviewAction::Delete
            ]
        );
        assert_eq!(
            SubmissionStatus::Rejected.allowed_actions(ViewerRole::Student),
            vec![ReviewAction::Reupload]
        );
        assert!(SubmissionStatus::Submitted
            .allowed_actions(ViewerRole::Agency)
            .is_empty());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&SubmissionStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }
}
