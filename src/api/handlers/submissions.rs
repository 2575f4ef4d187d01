use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{middleware::viewer::CurrentViewer, state::AppState},
    domain::{
        CompletionRatio, FileMetadata, ReviewAction, Submission, SubmissionFilter, ViewerRole,
    },
    error::Result,
    service::{AdHocUploadRequest, AssignRequest},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    #[serde(flatten)]
    submission: Submission,
    reviewable: bool,
    allowed_actions: Vec<ReviewAction>,
}

impl SubmissionView {
    fn for_role(submission: Submission, role: ViewerRole) -> Self {
        Self {
            reviewable: submission.is_reviewable(),
            allowed_actions: submission.status.allowed_actions(role),
            submission,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    submissions: Vec<SubmissionView>,
    total: usize,
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub file: FileMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueDateBody {
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Query(mut filter): Query<SubmissionFilter>,
) -> Result<Json<ListResponse>> {
    // Students only ever see their own submissions.
    if current.viewer.role == ViewerRole::Student {
        filter.owner_id = Some(current.viewer.id);
    }

    let submissions: Vec<SubmissionView> = state.service_context.review_service
        .list(filter)
        .await?
        .into_iter()
        .map(|s| SubmissionView::for_role(s, current.viewer.role))
        .collect();
    let total = submissions.len();

    Ok(Json(ListResponse { submissions, total }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .view(&current.viewer, id)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Json(request): Json<AdHocUploadRequest>,
) -> Result<(StatusCode, Json<SubmissionView>)> {
    let submission = state.service_context.review_service
        .submit_ad_hoc(&current.viewer, request)
        .await?;
    Ok((StatusCode::CREATED, Json(SubmissionView::for_role(submission, current.viewer.role))))
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
    Json(body): Json<UploadBody>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .upload(&current.viewer, id, body.file)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn begin_review(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .begin_review(&current.viewer, id)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .approve(&current.viewer, id, body.feedback)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .reject(&current.viewer, id, &body.feedback)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn set_due_date(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
    Json(body): Json<DueDateBody>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .set_due_date(&current.viewer, id, body.due_date)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.service_context.review_service
        .delete(&current.viewer, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Json(request): Json<AssignRequest>,
) -> Result<(StatusCode, Json<SubmissionView>)> {
    let submission = state.service_context.review_service
        .assign_from_template(&current.viewer, request)
        .await?;
    Ok((StatusCode::CREATED, Json(SubmissionView::for_role(submission, current.viewer.role))))
}

pub async fn ensure_due_date(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path((student_id, template_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<DueDateBody>,
) -> Result<Json<SubmissionView>> {
    let submission = state.service_context.review_service
        .ensure_assigned_then_set_due_date(&current.viewer, student_id, template_id, body.due_date)
        .await?;
    Ok(Json(SubmissionView::for_role(submission, current.viewer.role)))
}

pub async fn completion(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<CompletionRatio>> {
    let ratio = state.service_context.review_service
        .completion(&current.viewer, student_id)
        .await?;
    Ok(Json(ratio))
}

pub async fn review_queue(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
) -> Result<Json<ListResponse>> {
    let submissions: Vec<SubmissionView> = state.service_context.review_service
        .review_queue(&current.viewer)
        .await?
        .into_iter()
        .map(|s| SubmissionView::for_role(s, current.viewer.role))
        .collect();
    let total = submissions.len();

    Ok(Json(ListResponse { submissions, total }))
}
