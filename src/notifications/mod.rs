//! Notification sub-mirror
//!
//! A per-user live mirror of the notification collection, scoped server-side by
//! `userId`. Read state is two-phase: `mark_as_read` records a local overlay at once and
//! issues the remote update; the overlay is dropped as soon as a delta for that id arrives,
//! at which point the mirror is authoritative again. Deletes are never optimistic.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::backend::{server_timestamp, DocumentStore, Query, StoreError, WriteOp};
use crate::config::NotificationConfig;
use crate::record::Record;
use crate::sync::{Delta, DeltaBatch, LiveMirror, MirrorEvent};

/// Ordering field of the notification collection
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error("Notification {0} belongs to another user")]
    NotOwned(String),

    #[error("Notifications are not started")]
    NotStarted,
}

/// Notification `type` field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    NewReport,
    Emergency,
    Update,
    System,
    /// Sent to a student when an admin changes their report
    StatusUpdate,
    /// Fan-out to other admins after a status change
    AdminStatusUpdate,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewReport => "new_report",
            Self::Emergency => "emergency",
            Self::Update => "update",
            Self::System => "system",
            Self::StatusUpdate => "status_update",
            Self::AdminStatusUpdate => "admin_status_update",
            Self::Other(s) => s,
        }
    }

    /// Kinds that pop an alert when they arrive
    pub fn raises_alert(&self) -> bool {
        matches!(self, Self::NewReport | Self::Emergency)
    }
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new_report" => Self::NewReport,
            "emergency" => Self::Emergency,
            "update" => Self::Update,
            "system" | "" => Self::System,
            "status_update" => Self::StatusUpdate,
            "admin_status_update" => Self::AdminStatusUpdate,
            _ => Self::Other(s),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub priority: Option<String>,
    pub report_id: Option<String>,
    /// Unix millis
    pub timestamp: Option<i64>,
}

impl Notification {
    pub fn from_record(record: &Record) -> Self {
        let text = |field: &str| record.text(field).map(str::to_string);
        Self {
            id: record.id.clone(),
            user_id: text("userId").unwrap_or_default(),
            title: text("title").unwrap_or_else(|| "Notification".to_string()),
            message: text("message").unwrap_or_default(),
            read: record.flag("read"),
            kind: NotificationKind::from(text("type").unwrap_or_default()),
            priority: text("priority"),
            report_id: text("reportId"),
            timestamp: record.timestamp(TIMESTAMP_FIELD),
        }
    }

    /// Emergency styling: emergency kind or high priority
    pub fn is_urgent(&self) -> bool {
        self.kind == NotificationKind::Emergency || self.priority.as_deref() == Some("high")
    }
}

/// Fields for a new notification document
pub fn new_notification(
    user_id: &str,
    kind: NotificationKind,
    title: &str,
    message: &str,
    report_id: Option<&str>,
) -> Map<String, JsonValue> {
    let mut fields = Map::new();
    fields.insert("userId".into(), user_id.into());
    fields.insert("type".into(), kind.as_str().into());
    fields.insert("title".into(), title.into());
    fields.insert("message".into(), message.into());
    fields.insert("read".into(), false.into());
    fields.insert(TIMESTAMP_FIELD.into(), server_timestamp());
    if let Some(report_id) = report_id {
        fields.insert("reportId".into(), report_id.into());
    }
    fields
}

/// Result of pumping the notification stream once
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    /// A batch was applied. `alerts` holds newly arrived notifications to pop up.
    Changed { alerts: Vec<Notification> },
    ListenerError(StoreError),
}

/// Live notification list for the signed-in admin
pub struct NotificationCenter {
    store: Arc<dyn DocumentStore>,
    config: NotificationConfig,
    live: LiveMirror,
    user_id: Option<String>,
    /// Ids marked read locally whose confirming delta has not arrived yet
    pending_read: HashSet<String>,
    snapshot_seen: bool,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn DocumentStore>, config: NotificationConfig) -> Self {
        Self {
            store,
            config,
            live: LiveMirror::new(TIMESTAMP_FIELD),
            user_id: None,
            pending_read: HashSet::new(),
            snapshot_seen: false,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    /// Subscribe to `user_id`'s notifications, cancelling any previous subscription first.
    ///
    /// The newest `initial_limit` entries are loaded up front; the unlimited subscription
    /// snapshot replaces them on the first [`next_change`](Self::next_change).
    pub async fn start(&mut self, user_id: &str) -> Result<(), NotificationError> {
        self.stop();

        let query = Query::collection(&self.config.collection)
            .where_eq("userId", user_id)
            .order_by_desc(TIMESTAMP_FIELD);
        let initial = self
            .store
            .query(&query.clone().limit(self.config.initial_limit))
            .await?;
        let subscription = self.store.subscribe(&query).await?;

        self.live.replace(subscription);
        self.live.seed(initial);
        self.user_id = Some(user_id.to_string());
        info!(user_id, "Notification subscription started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.live.reset();
        self.user_id = None;
        self.pending_read.clear();
        self.snapshot_seen = false;
    }

    /// Wait for and apply the next notification batch.
    pub async fn next_change(&mut self) -> Option<NotificationEvent> {
        match self.live.next_change().await? {
            MirrorEvent::Changed(summary) => {
                for id in summary.touched() {
                    self.pending_read.remove(id);
                }

                let alerts = if self.snapshot_seen {
                    summary
                        .added
                        .iter()
                        .filter_map(|id| self.live.mirror().get(id))
                        .map(Notification::from_record)
                        .filter(|n| !n.read && n.kind.raises_alert())
                        .collect()
                } else {
                    self.snapshot_seen = true;
                    Vec::new()
                };

                Some(NotificationEvent::Changed { alerts })
            }
            MirrorEvent::ListenerError(e) => Some(NotificationEvent::ListenerError(e)),
        }
    }

    /// Notifications newest first, with pending local reads applied
    pub fn list(&self) -> Vec<Notification> {
        self.live
            .mirror()
            .records()
            .iter()
            .map(|r| self.view(r))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.live.mirror().get(id).map(|r| self.view(r))
    }

    fn view(&self, record: &Record) -> Notification {
        let mut notification = Notification::from_record(record);
        if self.pending_read.contains(&notification.id) {
            notification.read = true;
        }
        notification
    }

    pub fn unread_count(&self) -> usize {
        self.list().iter().filter(|n| !n.read).count()
    }

    pub fn has_urgent_unread(&self) -> bool {
        self.list().iter().any(|n| !n.read && n.is_urgent())
    }

    /// Badge text, `None` when nothing is unread
    pub fn badge(&self) -> Option<String> {
        match self.unread_count() {
            0 => None,
            n if n > self.config.badge_cap => Some(format!("{}+", self.config.badge_cap)),
            n => Some(n.to_string()),
        }
    }

    fn owned(&self, id: &str) -> Result<Notification, NotificationError> {
        let user_id = self.user_id.as_deref().ok_or(NotificationError::NotStarted)?;
        let notification = self
            .get(id)
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;
        if notification.user_id != user_id {
            return Err(NotificationError::NotOwned(id.to_string()));
        }
        Ok(notification)
    }

    /// Mark one notification read. Applied locally first; a failed remote write is
    /// logged and left for the next delta to reconcile.
    pub async fn mark_as_read(&mut self, id: &str) -> Result<(), NotificationError> {
        let notification = self.owned(id)?;
        if notification.read {
            return Ok(());
        }
        self.pending_read.insert(id.to_string());

        let mut fields = Map::new();
        fields.insert("read".into(), true.into());
        fields.insert("readAt".into(), server_timestamp());
        if let Err(e) = self.store.update(&self.config.collection, id, fields).await {
            warn!(id, error = %e, "Failed to persist read flag");
        }
        Ok(())
    }

    /// Mark every unread notification read in one atomic batch. Nothing changes locally
    /// unless the batch commits.
    pub async fn mark_all_as_read(&mut self) -> Result<usize, NotificationError> {
        if self.user_id.is_none() {
            return Err(NotificationError::NotStarted);
        }
        let unread: Vec<String> = self
            .list()
            .into_iter()
            .filter(|n| !n.read)
            .map(|n| n.id)
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }

        let ops = unread
            .iter()
            .map(|id| {
                let mut fields = Map::new();
                fields.insert("read".into(), true.into());
                fields.insert("readAt".into(), server_timestamp());
                WriteOp::Update {
                    collection: self.config.collection.clone(),
                    id: id.clone(),
                    fields,
                }
            })
            .collect();
        self.store.commit_batch(ops).await?;

        let count = unread.len();
        self.pending_read.extend(unread);
        debug!(count, "Marked all notifications read");
        Ok(count)
    }

    /// Delete remotely, then remove locally. A failed delete leaves it in place.
    pub async fn dismiss(&mut self, id: &str) -> Result<(), NotificationError> {
        self.owned(id)?;
        self.store.delete(&self.config.collection, id).await?;

        self.live
            .apply_local(DeltaBatch::new(vec![Delta::Removed(id.to_string())]));
        self.pending_read.remove(id);
        Ok(())
    }

    /// Delete every listed notification in one atomic batch.
    pub async fn clear_all(&mut self) -> Result<usize, NotificationError> {
        if self.user_id.is_none() {
            return Err(NotificationError::NotStarted);
        }
        let ids: Vec<String> = self
            .live
            .mirror()
            .records()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let ops = ids
            .iter()
            .map(|id| WriteOp::Delete {
                collection: self.config.collection.clone(),
                id: id.clone(),
            })
            .collect();
        self.store.commit_batch(ops).await?;

        let count = ids.len();
        self.live.apply_local(DeltaBatch::new(
            ids.into_iter().map(Delta::Removed).collect(),
        ));
        self.pending_read.clear();
        info!(count, "Cleared notifications");
        Ok(count)
    }
}
