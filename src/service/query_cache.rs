use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    domain::{Submission, SubmissionFilter},
    error::Result,
    events::{InvalidationEvent, Subscriber},
    repository::SubmissionRepository,
};

/// Submission list results keyed by filter.
///
/// A response is stored under the filter it was requested with, so a slow
/// response for one filter never overwrites another. A fetch that started
/// before an invalidation is returned to its caller but not cached.
pub struct SubmissionQueryCache {
    repo: Arc<dyn SubmissionRepository>,
    entries: RwLock<HashMap<SubmissionFilter, Vec<Submission>>>,
    generation: AtomicU64,
}

impl SubmissionQueryCache {
    pub fn new(repo: Arc<dyn SubmissionRepository>) -> Self {
        Self {
            repo,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn list(&self, filter: SubmissionFilter) -> Result<Vec<Submission>> {
        if let Some(cached) = self.entries.read().await.get(&filter) {
            tracing::debug!("Submission cache hit for {:?}", filter);
            return Ok(cached.clone());
        }

        let started_at = self.generation.load(Ordering::SeqCst);
        let fresh = self.repo.list(&filter).await?;

        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::SeqCst) == started_at {
            entries.insert(filter, fresh.clone());
        } else {
            tracing::debug!("Discarding stale submission list for {:?}", filter);
        }

        Ok(fresh)
    }

    pub async fn is_cached(&self, filter: &SubmissionFilter) -> bool {
        self.entries.read().await.contains_key(filter)
    }

    pub async fn invalidate_owner(&self, owner_id: uuid::Uuid) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.retain(|filter, _| filter.owner_id.is_some_and(|id| id != owner_id));
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }
}

#[async_trait]
impl Subscriber for SubmissionQueryCache {
    fn name(&self) -> &str {
        "submission-cache"
    }

    async fn handle_event(&self, event: &InvalidationEvent) -> Result<()> {
        match event {
            InvalidationEvent::Submissions { owner_id } => self.invalidate_owner(*owner_id).await,
            _ => {}
        }
        Ok(())
    }
}
