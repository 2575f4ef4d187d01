use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    config::BackendConfig,
    domain::*,
    error::{AppError, ErrorEnvelope, Result},
    repository::{NotificationSource, StudentRepository, SubmissionRepository, TemplateRepository},
};

const PAGE_SIZE: u32 = 100;
// Guards against a backend that never reports the last page.
const MAX_PAGES: u32 = 50;

/// List endpoints answer either with a bare array or with a page envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Paged {
        data: Vec<T>,
        #[serde(default, rename = "totalPages")]
        total_pages: Option<u32>,
    },
    Plain(Vec<T>),
}

/// Loosely typed row of any notifiable collection.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceRecord {
    id: Uuid,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    submitted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    title: Option<String>,
}

impl SourceRecord {
    fn into_item(self) -> Option<NotificationItem> {
        let created_at = self.created_at.or(self.submitted_date)?;
        Some(NotificationItem {
            id: self.id,
            created_at,
            title: self.title,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DueDateBody {
    due_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody {
    template_id: Uuid,
    due_date: Option<DateTime<Utc>>,
}

/// JSON client for the practicum REST backend.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::Server {
                    code: "MALFORMED_RESPONSE".to_string(),
                    message: e.to_string(),
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, body))
    }

    async fn send_optional<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        match self.send(request).await {
            Ok(value) => Ok(Some(value)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(AppError::Server { ref code, .. }) if code == StatusCode::NOT_FOUND.as_str() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, body))
    }

    /// Follows page envelopes until the backend reports the last page.
    async fn fetch_all<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let request = self
                .request(Method::GET, path)
                .query(query)
                .query(&[("page", page), ("perPage", PAGE_SIZE)]);

            match self.send::<ListResponse<T>>(request).await? {
                ListResponse::Plain(mut rows) => {
                    items.append(&mut rows);
                    return Ok(items);
                }
                ListResponse::Paged { mut data, total_pages } => {
                    let step = next_page(page, total_pages, data.len());
                    items.append(&mut data);
                    match step {
                        PageStep::Done => return Ok(items),
                        PageStep::Truncated => {
                            tracing::warn!(
                                "Stopped paging {} after {} pages; list is truncated at {} rows",
                                path,
                                MAX_PAGES,
                                items.len()
                            );
                            return Ok(items);
                        }
                        PageStep::Next(next) => page = next,
                    }
                }
            }
        }
    }

    fn source_path(stream: StreamType) -> &'static str {
        match stream {
            StreamType::Announcement => "/announcements",
            StreamType::Template => "/requirement-templates",
            StreamType::Comment => "/comments",
            StreamType::ReportView => "/report-views",
            StreamType::Requirement => "/submissions",
        }
    }
}

#[derive(Debug, PartialEq)]
enum PageStep {
    Done,
    Truncated,
    Next(u32),
}

fn next_page(page: u32, total_pages: Option<u32>, rows: usize) -> PageStep {
    let last = rows == 0 || total_pages.map_or(rows < PAGE_SIZE as usize, |total| page >= total);
    if last {
        PageStep::Done
    } else if page >= MAX_PAGES {
        PageStep::Truncated
    } else {
        PageStep::Next(page + 1)
    }
}

fn error_from_response(status: StatusCode, body: String) -> AppError {
    if status == StatusCode::UNAUTHORIZED {
        return AppError::Unauthorized;
    }
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => envelope.into(),
        Err(_) => AppError::Server {
            code: status.as_u16().to_string(),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        },
    }
}

fn filter_query(filter: &SubmissionFilter) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(owner_id) = filter.owner_id {
        query.push(("ownerId", owner_id.to_string()));
    }
    if let Some(status) = filter.status {
        query.push(("status", status.as_str().to_string()));
    }
    if let Some(kind) = filter.kind {
        let kind = match kind {
            SubmissionKind::Requirement => "requirement",
            SubmissionKind::Report => "report",
        };
        query.push(("kind", kind.to_string()));
    }
    query
}

#[async_trait]
impl SubmissionRepository for HttpBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Submission>> {
        self.send_optional(self.request(Method::GET, &format!("/submissions/{}", id)))
            .await
    }

    async fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        self.fetch_all("/submissions", &filter_query(filter)).await
    }

    async fn assign_from_template(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        let request = self
            .request(Method::POST, &format!("/students/{}/requirements", owner_id))
            .json(&AssignBody { template_id, due_date });
        self.send(request).await
    }

    async fn create_ad_hoc(
        &self,
        owner_id: Uuid,
        kind: SubmissionKind,
        file: FileMetadata,
    ) -> Result<Submission> {
        let request = self.request(Method::POST, "/submissions").json(&json!({
            "ownerId": owner_id,
            "kind": kind,
            "file": file,
        }));
        self.send(request).await
    }

    async fn upload(&self, id: Uuid, file: FileMetadata) -> Result<Submission> {
        let request = self
            .request(Method::POST, &format!("/submissions/{}/upload", id))
            .json(&json!({ "file": file }));
        self.send(request).await
    }

    async fn begin_review(&self, id: Uuid) -> Result<Submission> {
        self.send(self.request(Method::POST, &format!("/submissions/{}/begin-review", id)))
            .await
    }

    async fn approve(&self, id: Uuid, note: Option<String>) -> Result<Submission> {
        let request = self
            .request(Method::POST, &format!("/submissions/{}/approve", id))
            .json(&json!({ "feedback": note }));
        self.send(request).await
    }

    async fn reject(&self, id: Uuid, reason: String) -> Result<Submission> {
        let request = self
            .request(Method::POST, &format!("/submissions/{}/reject", id))
            .json(&json!({ "feedback": reason }));
        self.send(request).await
    }

    async fn set_due_date(&self, id: Uuid, due_date: Option<DateTime<Utc>>) -> Result<Submission> {
        let request = self
            .request(Method::PATCH, &format!("/submissions/{}/due-date", id))
            .json(&DueDateBody { due_date });
        self.send(request).await
    }

    async fn ensure_assigned_with_due_date(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Submission> {
        let path = format!("/students/{}/templates/{}/due-date", owner_id, template_id);
        let request = self.request(Method::PUT, &path).json(&DueDateBody { due_date });
        self.send(request).await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/submissions/{}", id)))
            .await
    }
}

#[async_trait]
impl TemplateRepository for HttpBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RequirementTemplate>> {
        self.send_optional(self.request(Method::GET, &format!("/requirement-templates/{}", id)))
            .await
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<RequirementTemplate>> {
        self.fetch_all(
            "/requirement-templates",
            &[("includeInactive", include_inactive.to_string())],
        )
        .await
    }
}

#[async_trait]
impl StudentRepository for HttpBackend {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Student>> {
        self.send_optional(self.request(Method::GET, &format!("/students/{}", id)))
            .await
    }

    async fn list_by_instructor(&self, instructor_id: Uuid) -> Result<Vec<Student>> {
        self.fetch_all(&format!("/instructors/{}/students", instructor_id), &[])
            .await
    }
}

#[async_trait]
impl NotificationSource for HttpBackend {
    async fn fetch(&self, viewer: &Viewer, stream: StreamType) -> Result<Vec<NotificationItem>> {
        let mut query = vec![("viewerId", viewer.id.to_string())];
        if stream == StreamType::Requirement && viewer.role == ViewerRole::Student {
            query.push(("ownerId", viewer.id.to_string()));
        }

        let records: Vec<SourceRecord> = self.fetch_all(Self::source_path(stream), &query).await?;
        let total = records.len();
        let items: Vec<NotificationItem> = records
            .into_iter()
            .filter_map(SourceRecord::into_item)
            .collect();

        if items.len() < total {
            tracing::debug!(
                "Skipped {} undated {} records",
                total - items.len(),
                stream
            );
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_accepts_both_shapes() {
        let plain: ListResponse<u32> = serde_json::from_str("[1, 2, 3]").unwrap();
        assert!(matches!(plain, ListResponse::Plain(ref v) if v.len() == 3));

        let paged: ListResponse<u32> =
            serde_json::from_str(r#"{"data": [1], "totalPages": 4}"#).unwrap();
        assert!(matches!(paged, ListResponse::Paged { total_pages: Some(4), .. }));
    }

    #[test]
    fn source_record_falls_back_to_submitted_date() {
        let record: SourceRecord = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "submittedDate": "2025-03-01T08:00:00Z",
        }))
        .unwrap();
        let item = record.into_item().unwrap();
        assert_eq!(item.created_at.to_rfc3339(), "2025-03-01T08:00:00+00:00");

        let undated: SourceRecord = serde_json::from_value(json!({ "id": Uuid::new_v4() })).unwrap();
        assert!(undated.into_item().is_none());
    }

    #[test]
    fn paging_stops_at_the_last_page_or_the_cap() {
        let full = PAGE_SIZE as usize;
        assert_eq!(next_page(1, Some(3), full), PageStep::Next(2));
        assert_eq!(next_page(3, Some(3), full), PageStep::Done);
        assert_eq!(next_page(2, None, full - 1), PageStep::Done);
        assert_eq!(next_page(4, None, 0), PageStep::Done);
        assert_eq!(next_page(MAX_PAGES, Some(MAX_PAGES + 10), full), PageStep::Truncated);
        assert_eq!(next_page(MAX_PAGES, None, full), PageStep::Truncated);
    }

    #[test]
    fn error_bodies_map_to_taxonomy() {
        let body = json!({ "message": "Already approved", "code": "INVALID_STATE" }).to_string();
        assert_eq!(
            error_from_response(StatusCode::CONFLICT, body),
            AppError::InvalidState("Already approved".to_string())
        );
        assert_eq!(
            error_from_response(StatusCode::UNAUTHORIZED, String::new()),
            AppError::Unauthorized
        );
        assert!(matches!(
            error_from_response(StatusCode::BAD_GATEWAY, "upstream down".to_string()),
            AppError::Server { ref code, .. } if code == "502"
        ));
    }

    #[test]
    fn filter_query_uses_wire_names() {
        let owner = Uuid::new_v4();
        let filter = SubmissionFilter {
            owner_id: Some(owner),
            status: Some(SubmissionStatus::InProgress),
            kind: Some(SubmissionKind::Report),
        };
        assert_eq!(
            filter_query(&filter),
            vec![
                ("ownerId", owner.to_string()),
                ("status", "in-progress".to_string()),
                ("kind", "report".to_string()),
            ]
        );
    }
}
