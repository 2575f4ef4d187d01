use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use uuid::Uuid;

use crate::{
    domain::{NotificationItem, ReadState, StreamKey, StreamType, Viewer},
    error::{AppError, Result},
    events::{InvalidationEvent, Subscriber},
    repository::{KeyValueStore, NotificationSource},
};

#[derive(Default)]
struct TrackerState {
    viewer_id: Option<Uuid>,
    read: ReadState,
    // False until the persisted record has been read once; nothing is
    // written while the stored state is unknown.
    loaded: bool,
    persist_failed: bool,
}

/// Read/unread bookkeeping for one stream type.
///
/// All read-modify-write cycles run under one async mutex, so concurrent
/// `mark_as_read` calls each see the result of the previous one. Writes merge
/// with the stored record, so persisted read-state only ever grows.
pub struct UnreadTracker {
    stream: StreamType,
    store: Arc<dyn KeyValueStore>,
    inner: Mutex<TrackerState>,
}

impl UnreadTracker {
    pub fn new(stream: StreamType, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            stream,
            store,
            inner: Mutex::new(TrackerState::default()),
        }
    }

    pub async fn for_viewer(stream: StreamType, store: Arc<dyn KeyValueStore>, viewer_id: Uuid) -> Self {
        let tracker = Self::new(stream, store);
        tracker.switch_viewer(viewer_id).await;
        tracker
    }

    pub fn stream(&self) -> StreamType {
        self.stream
    }

    /// Replaces the in-memory state with `viewer_id`'s persisted record.
    pub async fn switch_viewer(&self, viewer_id: Uuid) {
        let mut state = self.inner.lock().await;
        if state.viewer_id == Some(viewer_id) {
            self.ensure_loaded(&mut state).await;
            return;
        }

        *state = TrackerState {
            viewer_id: Some(viewer_id),
            ..TrackerState::default()
        };
        self.ensure_loaded(&mut state).await;
    }

    pub async fn viewer_id(&self) -> Option<Uuid> {
        self.inner.lock().await.viewer_id
    }

    pub async fn compute_unread(&self, items: &[NotificationItem]) -> Vec<NotificationItem> {
        let mut state = self.inner.lock().await;
        self.ensure_loaded(&mut state).await;
        state.read.unread(items)
    }

    pub async fn unread_count(&self, items: &[NotificationItem]) -> usize {
        let mut state = self.inner.lock().await;
        self.ensure_loaded(&mut state).await;
        state.read.unread_count(items)
    }

    pub async fn is_unread(&self, item: &NotificationItem) -> bool {
        let mut state = self.inner.lock().await;
        self.ensure_loaded(&mut state).await;
        state.read.is_unread(item)
    }

    /// Returns `false` when the item was already marked; nothing is written then.
    pub async fn mark_as_read(&self, item_id: Uuid) -> Result<bool> {
        let mut state = self.inner.lock().await;
        let viewer_id = state.viewer_id.ok_or(AppError::Unauthorized)?;
        self.ensure_loaded(&mut state).await;

        if !state.read.insert(item_id) {
            return Ok(false);
        }

        self.persist(viewer_id, &mut state).await;
        Ok(true)
    }

    /// Marks every loaded item and moves the watermark to now, which also
    /// covers older items that have not been loaded yet.
    pub async fn mark_all_as_read(&self, items: &[NotificationItem]) -> Result<()> {
        let mut state = self.inner.lock().await;
        let viewer_id = state.viewer_id.ok_or(AppError::Unauthorized)?;
        self.ensure_loaded(&mut state).await;

        state.read.mark_all(items, Utc::now());
        self.persist(viewer_id, &mut state).await;
        Ok(())
    }

    pub async fn read_state(&self) -> ReadState {
        let mut state = self.inner.lock().await;
        self.ensure_loaded(&mut state).await;
        state.read.clone()
    }

    /// True when the persisted record could not be read or the last write
    /// did not reach the store; the in-memory state is kept for this session.
    pub async fn is_persistence_degraded(&self) -> bool {
        let state = self.inner.lock().await;
        state.persist_failed || (state.viewer_id.is_some() && !state.loaded)
    }

    /// Reads the persisted record if that has not succeeded yet, keeping
    /// anything marked in the meantime.
    async fn ensure_loaded(&self, state: &mut TrackerState) {
        let Some(viewer_id) = state.viewer_id else {
            return;
        };
        if state.loaded {
            return;
        }

        let key = StreamKey::new(viewer_id, self.stream);
        match self.load(&key).await {
            Ok(stored) => {
                tracing::debug!(
                    "Loaded {} read ids for {}",
                    stored.read_ids.len(),
                    key.storage_key()
                );
                state.read.merge(stored);
                state.loaded = true;
            }
            Err(e) => {
                tracing::warn!("Could not load read-state {}, will retry: {}", key.storage_key(), e);
            }
        }
    }

    async fn load(&self, key: &StreamKey) -> Result<ReadState> {
        let raw = self.store.get(&key.storage_key()).await?;
        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable read-state {}: {}", key.storage_key(), e);
                ReadState::default()
            }),
            None => ReadState::default(),
        })
    }

    async fn persist(&self, viewer_id: Uuid, state: &mut TrackerState) {
        let key = StreamKey::new(viewer_id, self.stream);
        let result = self.write_merged(&key, state).await;

        match result {
            Ok(()) => state.persist_failed = false,
            Err(e) => {
                tracing::warn!("Read-state {} kept in memory only: {}", key.storage_key(), e);
                state.persist_failed = true;
            }
        }
    }

    async fn write_merged(&self, key: &StreamKey, state: &mut TrackerState) -> Result<()> {
        // Whatever is stored now is folded in, so a write never drops ids.
        let stored = self.load(key).await?;
        state.read.merge(stored);
        state.loaded = true;

        let raw = serde_json::to_string(&state.read).map_err(|e| AppError::Internal(e.to_string()))?;
        self.store.set(&key.storage_key(), raw).await
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamError {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for StreamError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub stream: StreamType,
    pub unread_count: usize,
    pub unread: Vec<NotificationItem>,
    pub error: Option<StreamError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub viewer_id: Uuid,
    pub total_unread: usize,
    pub streams: Vec<StreamStatus>,
}

impl NotificationSummary {
    pub fn stream(&self, stream: StreamType) -> Option<&StreamStatus> {
        self.streams.iter().find(|s| s.stream == stream)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightedItem {
    #[serde(flatten)]
    pub item: NotificationItem,
    pub unread: bool,
}

/// Aggregates the per-stream trackers for the signed-in viewer.
///
/// Badges, tab counts and item highlights all come from the same tracker
/// call, so the displays cannot disagree.
pub struct NotificationCenter {
    source: Arc<dyn NotificationSource>,
    streams: Vec<StreamType>,
    trackers: HashMap<StreamType, Arc<UnreadTracker>>,
    viewer: RwLock<Option<Viewer>>,
    loaded: RwLock<HashMap<StreamKey, Vec<NotificationItem>>>,
    // Bumped whenever loaded lists are dropped; a fetch that spans a bump is not kept.
    generation: AtomicU64,
}

impl NotificationCenter {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        store: Arc<dyn KeyValueStore>,
        streams: &[StreamType],
    ) -> Self {
        let mut unique = streams.to_vec();
        unique.sort();
        unique.dedup();

        let trackers = unique
            .iter()
            .map(|stream| (*stream, Arc::new(UnreadTracker::new(*stream, store.clone()))))
            .collect();

        Self {
            source,
            streams: unique,
            trackers,
            viewer: RwLock::new(None),
            loaded: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn streams(&self) -> &[StreamType] {
        &self.streams
    }

    pub fn tracker(&self, stream: StreamType) -> Result<Arc<UnreadTracker>> {
        self.trackers
            .get(&stream)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("Stream {} is not tracked", stream)))
    }

    /// Switches every tracker to `viewer`. Waits for in-flight operations of
    /// the previous viewer to finish first.
    pub async fn set_viewer(&self, viewer: Viewer) {
        let mut current = self.viewer.write().await;
        if current.as_ref() == Some(&viewer) {
            return;
        }

        for tracker in self.trackers.values() {
            tracker.switch_viewer(viewer.id).await;
        }
        {
            let mut loaded = self.loaded.write().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            loaded.clear();
        }

        tracing::info!("Notification viewer switched to {}", viewer.id);
        *current = Some(viewer);
    }

    /// Fetches every stream independently. A failed stream reports zero
    /// unread and carries its error; the others are unaffected.
    pub async fn refresh(&self, viewer: &Viewer) -> Result<NotificationSummary> {
        let _guard = self.acquire(viewer).await;

        let streams = join_all(
            self.streams
                .iter()
                .map(|stream| self.refresh_stream(viewer, *stream)),
        )
        .await;

        let total_unread = streams.iter().map(|s| s.unread_count).sum();

        Ok(NotificationSummary {
            viewer_id: viewer.id,
            total_unread,
            streams,
        })
    }

    /// Loaded items of one stream with their read/unread highlight.
    pub async fn stream_items(&self, viewer: &Viewer, stream: StreamType) -> Result<Vec<HighlightedItem>> {
        let _guard = self.acquire(viewer).await;
        let tracker = self.tracker(stream)?;
        let items = self.load_items(viewer, stream).await?;

        let mut highlighted = Vec::with_capacity(items.len());
        for item in items {
            let unread = tracker.is_unread(&item).await;
            highlighted.push(HighlightedItem { item, unread });
        }
        Ok(highlighted)
    }

    pub async fn mark_as_read(&self, viewer: &Viewer, stream: StreamType, item_id: Uuid) -> Result<bool> {
        let _guard = self.acquire(viewer).await;
        self.tracker(stream)?.mark_as_read(item_id).await
    }

    pub async fn mark_all_as_read(&self, viewer: &Viewer, stream: StreamType) -> Result<()> {
        let _guard = self.acquire(viewer).await;
        let tracker = self.tracker(stream)?;
        // Without a fresh list the watermark alone still covers everything older.
        let items = self.load_items(viewer, stream).await.unwrap_or_else(|e| {
            tracing::warn!("Marking {} read without item list: {}", stream, e);
            Vec::new()
        });
        tracker.mark_all_as_read(&items).await
    }

    /// Read guard on the current viewer, switching to `viewer` first if needed.
    async fn acquire(&self, viewer: &Viewer) -> RwLockReadGuard<'_, Option<Viewer>> {
        loop {
            let guard = self.viewer.read().await;
            if guard.as_ref() == Some(viewer) {
                return guard;
            }
            drop(guard);
            self.set_viewer(*viewer).await;
        }
    }

    async fn refresh_stream(&self, viewer: &Viewer, stream: StreamType) -> StreamStatus {
        let tracker = match self.tracker(stream) {
            Ok(tracker) => tracker,
            Err(e) => return Self::failed(stream, &e),
        };

        match self.fetch_items(viewer, stream).await {
            Ok(items) => {
                let unread = tracker.compute_unread(&items).await;
                StreamStatus {
                    stream,
                    unread_count: unread.len(),
                    unread,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Notification stream {} unavailable: {}", stream, e);
                Self::failed(stream, &e)
            }
        }
    }

    fn failed(stream: StreamType, error: &AppError) -> StreamStatus {
        StreamStatus {
            stream,
            unread_count: 0,
            unread: Vec::new(),
            error: Some(error.into()),
        }
    }

    async fn load_items(&self, viewer: &Viewer, stream: StreamType) -> Result<Vec<NotificationItem>> {
        let key = StreamKey::new(viewer.id, stream);
        if let Some(items) = self.loaded.read().await.get(&key) {
            return Ok(items.clone());
        }
        self.fetch_items(viewer, stream).await
    }

    async fn fetch_items(&self, viewer: &Viewer, stream: StreamType) -> Result<Vec<NotificationItem>> {
        let started_at = self.generation.load(Ordering::SeqCst);
        let items = self.source.fetch(viewer, stream).await?;

        let mut loaded = self.loaded.write().await;
        if self.generation.load(Ordering::SeqCst) == started_at {
            loaded.insert(StreamKey::new(viewer.id, stream), items.clone());
        } else {
            tracing::debug!("Discarding {} items fetched before invalidation", stream);
        }
        Ok(items)
    }

    async fn forget(&self, stream: StreamType) {
        let mut loaded = self.loaded.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        loaded.retain(|key, _| key.stream != stream);
    }
}

#[async_trait]
impl Subscriber for NotificationCenter {
    fn name(&self) -> &str {
        "notification-center"
    }

    async fn handle_event(&self, event: &InvalidationEvent) -> Result<()> {
        match event {
            InvalidationEvent::Stream(stream) => self.forget(*stream).await,
            InvalidationEvent::Templates => self.forget(StreamType::Template).await,
            InvalidationEvent::Submissions { .. } => self.forget(StreamType::Requirement).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryKeyValueStore;
    use chrono::Duration;

    fn item(minutes_ago: i64) -> NotificationItem {
        NotificationItem::new(Uuid::new_v4(), Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn mark_as_read_is_idempotent() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let tracker = UnreadTracker::for_viewer(StreamType::Comment, store, Uuid::new_v4()).await;
        let a = item(5);

        assert!(tracker.mark_as_read(a.id).await.unwrap());
        let once = tracker.read_state().await;
        assert!(!tracker.mark_as_read(a.id).await.unwrap());
        assert_eq!(tracker.read_state().await, once);
    }

    #[tokio::test]
    async fn concurrent_marks_are_not_lost() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let viewer = Uuid::new_v4();
        let tracker = Arc::new(UnreadTracker::for_viewer(StreamType::Announcement, store.clone(), viewer).await);
        let items: Vec<_> = (0..20).map(item).collect();

        let handles: Vec<_> = items
            .iter()
            .map(|i| {
                let tracker = tracker.clone();
                let id = i.id;
                tokio::spawn(async move { tracker.mark_as_read(id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(tracker.compute_unread(&items).await.is_empty());

        // The persisted record holds every id too.
        let reloaded = UnreadTracker::for_viewer(StreamType::Announcement, store, viewer).await;
        assert_eq!(reloaded.read_state().await.read_ids.len(), 20);
    }

    #[tokio::test]
    async fn marking_without_viewer_is_unauthorized() {
        let tracker = UnreadTracker::new(StreamType::Template, Arc::new(InMemoryKeyValueStore::new()));
        assert_eq!(tracker.mark_as_read(Uuid::new_v4()).await, Err(AppError::Unauthorized));
    }

    struct GatedSource {
        items: Vec<NotificationItem>,
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl NotificationSource for GatedSource {
        async fn fetch(&self, _viewer: &Viewer, _stream: StreamType) -> Result<Vec<NotificationItem>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.items.clone())
        }
    }

    #[tokio::test]
    async fn fetch_spanning_invalidation_is_not_kept() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let source = Arc::new(GatedSource {
            items: vec![item(1)],
            entered: entered.clone(),
            release: release.clone(),
        });
        let center = Arc::new(NotificationCenter::new(
            source,
            Arc::new(InMemoryKeyValueStore::new()),
            &[StreamType::Requirement],
        ));
        let viewer = Viewer::student(Uuid::new_v4());

        let in_flight = {
            let center = center.clone();
            tokio::spawn(async move { center.stream_items(&viewer, StreamType::Requirement).await })
        };

        entered.notified().await;
        center
            .handle_event(&InvalidationEvent::Stream(StreamType::Requirement))
            .await
            .unwrap();
        release.notify_one();

        // The caller still gets its answer.
        assert_eq!(in_flight.await.unwrap().unwrap().len(), 1);
        let key = StreamKey::new(viewer.id, StreamType::Requirement);
        assert!(!center.loaded.read().await.contains_key(&key));
    }

    #[tokio::test]
    async fn storage_failure_keeps_session_state() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let tracker = UnreadTracker::for_viewer(StreamType::ReportView, store.clone(), Uuid::new_v4()).await;
        let a = item(1);

        store.set_unavailable(true);
        assert!(tracker.mark_as_read(a.id).await.unwrap());
        assert!(!tracker.is_unread(&a).await);
        assert!(tracker.is_persistence_degraded().await);

        store.set_unavailable(false);
        tracker.mark_all_as_read(&[a]).await.unwrap();
        assert!(!tracker.is_persistence_degraded().await);
    }
}
