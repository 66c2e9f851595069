//! Record writes issued from a dashboard
//!
//! The primary write's error is returned to the caller. Notifications that accompany a
//! status change are best-effort: their failures are logged and never undo the update.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use super::{Dashboard, DashboardError, Toast};
use crate::backend::{server_timestamp, Query};
use crate::notifications::{new_notification, NotificationKind};
use crate::record::Record;
use crate::views::ViewSpec;

/// Triage change for one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Also notify the student who filed the report
    #[serde(default)]
    pub notify_user: bool,
}

impl StatusUpdate {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            notes: None,
            notify_user: false,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_notify_user(mut self, notify: bool) -> Self {
        self.notify_user = notify;
        self
    }

    fn notes(&self) -> Option<&str> {
        self.notes.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Field stamped the first time a report enters `status`
fn milestone_field(status: &str) -> Option<&'static str> {
    match status {
        "under investigation" => Some("investigationDate"),
        "assigned" => Some("assignedDate"),
        "resolved" => Some("resolvedDate"),
        _ => None,
    }
}

fn student_message(title: &str, status: &str, notes: Option<&str>) -> String {
    let change = match status {
        "under investigation" => "is now under investigation",
        "assigned" => "has been assigned to our team",
        "in progress" => "is currently being worked on",
        "resolved" => "has been resolved",
        _ => "has been updated",
    };
    match notes {
        Some(notes) => format!("Your report \"{}\" {}. Notes: {}", title, change, notes),
        None => format!("Your report \"{}\" {}.", title, change),
    }
}

/// Fields written by a status update against the current `report`
pub fn status_fields(report: &Record, update: &StatusUpdate) -> Map<String, JsonValue> {
    let mut fields = Map::new();
    fields.insert("status".into(), update.status.clone().into());
    fields.insert("lastUpdated".into(), server_timestamp());

    if let Some(field) = milestone_field(&update.status) {
        if report.get(field).is_none() {
            fields.insert(field.into(), server_timestamp());
        }
    }
    if let Some(notes) = update.notes() {
        fields.insert("adminNotes".into(), notes.into());
        fields.insert("lastAdminUpdate".into(), server_timestamp());
    }
    fields
}

impl<V: ViewSpec> Dashboard<V> {
    /// Change a report's status, then notify the student and fan out to admins.
    pub async fn update_report_status(
        &mut self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<(), DashboardError> {
        if self.session.is_none() {
            return Err(DashboardError::NotAuthorized);
        }
        let report = self
            .live
            .mirror()
            .get(id)
            .cloned()
            .ok_or_else(|| DashboardError::UnknownRecord(id.to_string()))?;

        let fields = status_fields(&report, &update);
        self.store
            .update(self.spec.collection(), id, fields)
            .await?;
        info!(id, status = %update.status, "Report status updated");

        let title = report.text("title").unwrap_or("Untitled").to_string();
        if update.notify_user {
            self.notify_student(&report, &title, &update).await;
        }
        self.notify_admins(id, &title, &update.status).await;

        self.surface
            .toast(Toast::success("Status updated successfully!"));
        Ok(())
    }

    async fn notify_student(&self, report: &Record, title: &str, update: &StatusUpdate) {
        let Some(student) = report.text("studentId") else {
            debug!(id = %report.id, "Report has no student, skipping notification");
            return;
        };
        let fields = new_notification(
            student,
            NotificationKind::StatusUpdate,
            "Report Status Update",
            &student_message(title, &update.status, update.notes()),
            Some(&report.id),
        );
        if let Err(e) = self
            .store
            .add(&self.config.notifications.collection, fields)
            .await
        {
            warn!(id = %report.id, error = %e, "Failed to notify student");
        }
    }

    async fn notify_admins(&self, id: &str, title: &str, status: &str) {
        let admins = match self
            .store
            .query(&Query::collection(&self.config.login.authorization_collection))
            .await
        {
            Ok(admins) => admins,
            Err(e) => {
                warn!(error = %e, "Failed to list admins for fan-out");
                return;
            }
        };

        let message = format!("Report \"{}\" status changed to {}", title, status);
        let collection = &self.config.notifications.collection;
        let writes = admins.iter().map(|admin| {
            let fields = new_notification(
                &admin.id,
                NotificationKind::AdminStatusUpdate,
                "Report Status Changed",
                &message,
                Some(id),
            );
            self.store.add(collection, fields)
        });

        let failed = join_all(writes)
            .await
            .into_iter()
            .filter(|r| r.is_err())
            .count();
        if failed > 0 {
            warn!(id, failed, total = admins.len(), "Some admin notifications failed");
        } else {
            debug!(id, count = admins.len(), "Admin notifications sent");
        }
    }

    /// Add a health record on behalf of the signed-in admin; returns the new id.
    pub async fn submit_health_record(
        &mut self,
        mut fields: Map<String, JsonValue>,
    ) -> Result<String, DashboardError> {
        let email = self
            .session
            .as_ref()
            .map(|s| s.identity.email.clone())
            .ok_or(DashboardError::NotAuthorized)?;

        fields.insert(self.spec.order_field().to_string(), server_timestamp());
        fields.insert("addedBy".into(), email.into());
        fields.insert("status".into(), "pending".into());

        let id = self.store.add(self.spec.collection(), fields).await?;
        info!(id = %id, collection = self.spec.collection(), "Record added");
        self.surface.toast(Toast::success("Record added successfully!"));
        Ok(id)
    }
}
