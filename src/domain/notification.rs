use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of notifiable entity, each tracked independently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum StreamType {
    Announcement,
    Template,
    Comment,
    ReportView,
    Requirement,
}

impl StreamType {
    pub const ALL: [StreamType; 5] = [
        StreamType::Announcement,
        StreamType::Template,
        StreamType::Comment,
        StreamType::ReportView,
        StreamType::Requirement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Announcement => "announcement",
            StreamType::Template => "template",
            StreamType::Comment => "comment",
            StreamType::ReportView => "report-view",
            StreamType::Requirement => "requirement",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown stream type: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
}

impl NotificationItem {
    pub fn new(id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            title: None,
        }
    }
}

/// Identifies one viewer's read-state for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub viewer_id: Uuid,
    pub stream: StreamType,
}

impl StreamKey {
    pub fn new(viewer_id: Uuid, stream: StreamType) -> Self {
        Self { viewer_id, stream }
    }

    /// Storage key; embeds both viewer and stream so accounts never share state.
    pub fn storage_key(&self) -> String {
        format!("read_state:{}:{}", self.viewer_id, self.stream)
    }
}

/// Locally persisted acknowledgement record for one [`StreamKey`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadState {
    #[serde(default)]
    pub read_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ReadState {
    /// Unread iff never acknowledged and created after the last "mark all read".
    pub fn is_unread(&self, item: &NotificationItem) -> bool {
        if self.read_ids.contains(&item.id) {
            return false;
        }
        match self.last_checked_at {
            None => true,
            Some(checked) => item.created_at > checked,
        }
    }

    pub fn unread(&self, items: &[NotificationItem]) -> Vec<NotificationItem> {
        items
            .iter()
            .filter(|item| self.is_unread(item))
            .cloned()
            .collect()
    }

    pub fn unread_count(&self, items: &[NotificationItem]) -> usize {
        items.iter().filter(|item| self.is_unread(item)).count()
    }

    /// Returns `false` when the id was already recorded.
    pub fn insert(&mut self, id: Uuid) -> bool {
        self.read_ids.insert(id)
    }

    pub fn mark_all(&mut self, items: &[NotificationItem], now: DateTime<Utc>) {
        self.read_ids.extend(items.iter().map(|item| item.id));
        self.advance_watermark(now);
    }

    /// Union of both records; the later watermark wins.
    pub fn merge(&mut self, other: ReadState) {
        self.read_ids.extend(other.read_ids);
        if let Some(checked) = other.last_checked_at {
            self.advance_watermark(checked);
        }
    }

    // Never moves backwards.
    fn advance_watermark(&mut self, at: DateTime<Utc>) {
        self.last_checked_at = Some(match self.last_checked_at {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }
}
