pub mod query_cache;
pub mod review_service;
pub mod notification_service;

use std::sync::Arc;
use crate::domain::StreamType;
use crate::events::InvalidationBus;
use crate::repository::*;
use query_cache::SubmissionQueryCache;
use review_service::ReviewService;
use notification_service::NotificationCenter;

pub use review_service::{AdHocUploadRequest, AssignRequest};
pub use notification_service::{
    HighlightedItem, NotificationSummary, StreamError, StreamStatus, UnreadTracker,
};

/// Anything that can serve as the practicum backend.
pub trait Backend:
    SubmissionRepository + TemplateRepository + StudentRepository + NotificationSource
{
}

impl<T> Backend for T where
    T: SubmissionRepository + TemplateRepository + StudentRepository + NotificationSource
{
}

pub struct ServiceContext {
    pub submission_repo: Arc<dyn SubmissionRepository>,
    pub template_repo: Arc<dyn TemplateRepository>,
    pub student_repo: Arc<dyn StudentRepository>,
    pub bus: Arc<InvalidationBus>,
    pub submission_cache: Arc<SubmissionQueryCache>,
    pub review_service: Arc<ReviewService>,
    pub notification_center: Arc<NotificationCenter>,
}

impl ServiceContext {
    pub async fn new<B>(
        backend: Arc<B>,
        store: Arc<dyn KeyValueStore>,
        streams: &[StreamType],
    ) -> Self
    where
        B: Backend + 'static,
    {
        let submission_repo: Arc<dyn SubmissionRepository> = backend.clone();
        let template_repo: Arc<dyn TemplateRepository> = backend.clone();
        let student_repo: Arc<dyn StudentRepository> = backend.clone();
        let source: Arc<dyn NotificationSource> = backend;

        let bus = Arc::new(InvalidationBus::new());
        let submission_cache = Arc::new(SubmissionQueryCache::new(submission_repo.clone()));
        let notification_center = Arc::new(NotificationCenter::new(source, store, streams));

        // Read models re-fetch when the workflow reports a change
        bus.register(submission_cache.clone()).await;
        bus.register(notification_center.clone()).await;

        let review_service = Arc::new(ReviewService::new(
            submission_repo.clone(),
            template_repo.clone(),
            student_repo.clone(),
            submission_cache.clone(),
            bus.clone(),
        ));

        Self {
            submission_repo,
            template_repo,
            student_repo,
            bus,
            submission_cache,
            review_service,
            notification_center,
        }
    }
}
