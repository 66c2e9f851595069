//! Dashboard integration tests
//!
//! A full dashboard against the in-memory backend and a recording surface:
//! - auth-state handling and subscription lifecycle
//! - one render per applied batch
//! - report triage writes and notification fan-out
//! - the event loop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::mpsc;

use campus_dashboards::backend::memory::{MemoryBackend, Operation};
use campus_dashboards::backend::{
    DocumentStore, Identity, IdentityProvider, Query, ReadSource, StoreError, WriteOp,
};
use campus_dashboards::sync::Subscription;
use campus_dashboards::dashboard::{
    Dashboard, DashboardError, RecordingSurface, StatusUpdate, StepEvent, ToastLevel, UiEvent,
};
use campus_dashboards::views::{FilterState, HealthView, OutreachView, ViewSpec};
use campus_dashboards::{Config, Record, SessionOutcome};

fn admin(uid: &str) -> Identity {
    Identity {
        uid: uid.into(),
        email: format!("{}@uoe.ac.ke", uid),
    }
}

fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert(
        "adminUsers",
        Record::from_json("admin-1", json!({ "departments": ["outreach", "health"] })),
    );
    backend.insert(
        "adminUsers",
        Record::from_json("admin-2", json!({ "departments": ["outreach"] })),
    );
    backend.insert(
        "reports",
        Record::from_json(
            "r1",
            json!({"timestamp": 100, "title": "Broken lamp", "category": "Lighting",
                   "status": "submitted", "studentId": "student-9"}),
        ),
    );
    backend.insert(
        "reports",
        Record::from_json(
            "r2",
            json!({"timestamp": 200, "title": "Bike stolen", "category": "Theft",
                   "priority": "urgent", "status": "submitted"}),
        ),
    );
    backend
}

fn dashboard<V: ViewSpec>(
    backend: &Arc<MemoryBackend>,
    spec: V,
) -> (Dashboard<V>, RecordingSurface) {
    let surface = RecordingSurface::new();
    let dashboard = Dashboard::new(
        spec,
        backend.clone(),
        backend.clone(),
        Box::new(surface.clone()),
        Config::default(),
    );
    (dashboard, surface)
}

async fn signed_in<V: ViewSpec>(
    backend: &Arc<MemoryBackend>,
    spec: V,
) -> (Dashboard<V>, RecordingSurface) {
    let (mut dashboard, surface) = dashboard(backend, spec);
    backend.set_signed_in(Some(admin("admin-1")));
    let outcome = dashboard
        .handle_auth_state(backend.current())
        .await
        .unwrap();
    assert!(outcome.is_authorized());
    drain(&mut dashboard).await;
    (dashboard, surface)
}

/// Process every pending live event
async fn drain<V: ViewSpec>(dashboard: &mut Dashboard<V>) -> Vec<StepEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(30), dashboard.step()).await
    {
        events.push(event);
    }
    events
}

/// Store that deletes one report after the seed query and before the subscription starts
struct DeleteBeforeSubscribe {
    inner: Arc<MemoryBackend>,
    doomed: &'static str,
}

#[async_trait]
impl DocumentStore for DeleteBeforeSubscribe {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        source: ReadSource,
    ) -> Result<Option<Record>, StoreError> {
        self.inner.get(collection, id, source).await
    }

    async fn add(
        &self,
        collection: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<String, StoreError> {
        self.inner.add(collection, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.inner.commit_batch(ops).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
        if query.collection == "reports" {
            let _ = self.inner.delete("reports", self.doomed).await;
        }
        self.inner.subscribe(query).await
    }
}

fn fields(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

// =============================================================================
// Auth state
// =============================================================================

#[tokio::test]
async fn test_authorized_dashboard_renders_and_subscribes_once() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    let view = surface.last_render().unwrap();
    assert_eq!(view.stat("total"), Some(2));
    assert_eq!(view.stat("high_priority"), Some(1));
    assert_eq!(dashboard.session().unwrap().display.initials, "AD");

    // Re-entering the signed-in state replaces rather than stacks subscriptions
    dashboard.handle_auth_state(backend.current()).await.unwrap();
    dashboard.handle_auth_state(backend.current()).await.unwrap();
    assert_eq!(backend.subscriber_count("reports"), 1);
    assert_eq!(backend.subscriber_count("notifications"), 1);
    assert!(surface.redirects().is_empty());
}

#[tokio::test]
async fn test_unauthorized_identity_is_redirected() {
    let backend = backend();
    let (mut dashboard, surface) = dashboard(&backend, HealthView::new());
    backend.set_signed_in(Some(admin("admin-2")));

    let outcome = dashboard.handle_auth_state(backend.current()).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Redirect { .. }));
    assert_eq!(surface.redirects(), vec!["index.html".to_string()]);
    assert!(surface.renders().is_empty());
    assert!(!dashboard.is_live());
    assert_eq!(backend.subscriber_count("health"), 0);
    assert!(backend.current().is_none());
}

#[tokio::test]
async fn test_denied_identity_redirects_once() {
    let backend = backend();
    let (mut dashboard, surface) = dashboard(&backend, HealthView::new());
    backend.set_signed_in(Some(admin("admin-2")));

    dashboard.handle_auth_state(backend.current()).await.unwrap();
    // The sign-out issued by the denial comes back as a signed-out state
    dashboard.handle_auth_state(None).await.unwrap();
    assert_eq!(surface.redirects(), vec!["index.html".to_string()]);

    // A fresh authorization re-arms the redirect
    backend.set_signed_in(Some(admin("admin-1")));
    dashboard.handle_auth_state(backend.current()).await.unwrap();
    dashboard.handle_auth_state(None).await.unwrap();
    assert_eq!(surface.redirects().len(), 2);
}

#[tokio::test]
async fn test_sign_out_tears_down() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    dashboard.handle_auth_state(None).await.unwrap();
    assert!(!dashboard.is_live());
    assert!(dashboard.session().is_none());
    assert_eq!(backend.subscriber_count("reports"), 0);
    assert_eq!(backend.subscriber_count("notifications"), 0);
    assert_eq!(surface.redirects().len(), 1);
}

#[tokio::test]
async fn test_subscribe_failure_is_reported() {
    let backend = backend();
    let (mut dashboard, surface) = dashboard(&backend, OutreachView::new());
    backend.fail(Operation::Subscribe, StoreError::Unavailable("offline".into()));

    let result = dashboard.handle_auth_state(Some(admin("admin-1"))).await;
    assert!(matches!(result, Err(DashboardError::Store(_))));
    let toasts = surface.toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, ToastLevel::Error);
}

// =============================================================================
// Initial load
// =============================================================================

#[tokio::test]
async fn test_record_deleted_during_startup_is_dropped() {
    let backend = backend();
    let store = Arc::new(DeleteBeforeSubscribe {
        inner: backend.clone(),
        doomed: "r1",
    });
    let surface = RecordingSurface::new();
    let mut dashboard = Dashboard::new(
        OutreachView::new(),
        store,
        backend.clone(),
        Box::new(surface.clone()),
        Config::default(),
    );

    dashboard.handle_auth_state(Some(admin("admin-1"))).await.unwrap();
    // The seed still carries the deleted report until the snapshot lands
    assert!(dashboard.mirror().contains("r1"));
    let events = drain(&mut dashboard).await;

    assert!(events.iter().any(|e| matches!(
        e,
        StepEvent::RecordsChanged(summary) if summary.removed == vec!["r1"]
    )));
    assert!(!dashboard.mirror().contains("r1"));
    assert_eq!(surface.last_render().unwrap().stat("total"), Some(1));
}

#[tokio::test]
async fn test_stats_cover_collection_beyond_initial_limit() {
    let backend = backend();
    for i in 0..150 {
        backend.insert(
            "reports",
            Record::from_json(
                format!("bulk-{}", i),
                json!({"timestamp": 1000 + i, "status": "resolved"}),
            ),
        );
    }
    let (dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    assert_eq!(dashboard.mirror().len(), 152);
    let view = surface.last_render().unwrap();
    assert_eq!(view.stat("total"), Some(152));
    assert_eq!(view.stat("resolved"), Some(150));
    assert_eq!(view.stat("pending"), Some(2));

    // The live query itself carries no limit
    assert_eq!(dashboard.default_query().limit, None);
}

// =============================================================================
// Live updates
// =============================================================================

#[tokio::test]
async fn test_one_render_per_batch() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;
    let renders = surface.renders().len();

    backend.insert(
        "reports",
        Record::from_json("r3", json!({"timestamp": 300, "status": "resolved"})),
    );
    match dashboard.step().await {
        Some(StepEvent::RecordsChanged(summary)) => assert_eq!(summary.added, vec!["r3"]),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(surface.renders().len(), renders + 1);

    let view = surface.last_render().unwrap();
    assert_eq!(view.stat("resolved"), Some(1));
    assert_eq!(view.table_rows[0].id, "r3");
    assert_eq!(dashboard.view(), Some(&view));
}

#[tokio::test]
async fn test_listener_error_shows_warning() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    backend.push_listener_error("reports", StoreError::Unavailable("reconnecting".into()));
    assert!(matches!(
        dashboard.step().await,
        Some(StepEvent::ListenerError(_))
    ));
    let toasts = surface.toasts();
    assert_eq!(toasts.last().unwrap().level, ToastLevel::Warning);
    assert!(dashboard.is_live());
}

#[tokio::test]
async fn test_new_report_notification_raises_alert() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;
    assert!(surface.alerts().is_empty());

    backend.insert(
        "notifications",
        Record::from_json(
            "n1",
            json!({"userId": "admin-1", "type": "new_report", "title": "New report",
                   "message": "Bike stolen", "read": false, "timestamp": 500}),
        ),
    );
    match dashboard.step().await {
        Some(StepEvent::NotificationsChanged { alerts }) => assert_eq!(alerts, 1),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(surface.alerts().len(), 1);
    let (list, unread, badge) = surface.last_notifications().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(unread, 1);
    assert_eq!(badge.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_set_scope_replaces_subscription() {
    let backend = backend();
    let (mut dashboard, _surface) = signed_in(&backend, OutreachView::new()).await;

    let theft = Query::collection("reports")
        .where_eq("category", "Theft")
        .order_by_desc("timestamp");
    dashboard.set_scope(theft).await.unwrap();
    drain(&mut dashboard).await;

    let ids: Vec<_> = dashboard.mirror().records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["r2"]);
    assert_eq!(backend.subscriber_count("reports"), 1);

    backend.insert(
        "reports",
        Record::from_json("r4", json!({"timestamp": 400, "category": "Lighting"})),
    );
    assert!(drain(&mut dashboard).await.is_empty());
    assert!(!dashboard.mirror().contains("r4"));
}

#[tokio::test]
async fn test_set_scope_requires_session() {
    let backend = backend();
    let (mut dashboard, _surface) = dashboard(&backend, OutreachView::new());
    assert!(matches!(
        dashboard.set_scope(Query::collection("reports")).await,
        Err(DashboardError::NotAuthorized)
    ));
}

#[tokio::test]
async fn test_filter_change_rerenders_from_mirror() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    dashboard.set_filter(FilterState::default().with_category("Theft"));
    let view = surface.last_render().unwrap();
    assert_eq!(view.table_rows.len(), 1);
    assert_eq!(view.stat("total"), Some(2));
    assert_eq!(dashboard.filter().category.as_deref(), Some("Theft"));
}

// =============================================================================
// Triage writes
// =============================================================================

#[tokio::test]
async fn test_status_update_notifies_student_and_admins() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    let update = StatusUpdate::new("resolved")
        .with_notes("Lamp replaced")
        .with_notify_user(true);
    dashboard.update_report_status("r1", update).await.unwrap();

    let report = backend.document("reports", "r1").unwrap();
    assert_eq!(report.text("status"), Some("resolved"));
    assert_eq!(report.text("adminNotes"), Some("Lamp replaced"));
    assert!(report.timestamp("resolvedDate").is_some());
    assert!(report.timestamp("lastUpdated").is_some());

    let notifications = backend.records("notifications");
    let mut recipients: Vec<_> = notifications.iter().filter_map(|n| n.text("userId")).collect();
    recipients.sort();
    assert_eq!(recipients, vec!["admin-1", "admin-2", "student-9"]);

    let student = notifications
        .iter()
        .find(|n| n.text("userId") == Some("student-9"))
        .unwrap();
    assert_eq!(student.text("type"), Some("status_update"));
    assert_eq!(student.text("reportId"), Some("r1"));
    assert!(student.text("message").unwrap().contains("Notes: Lamp replaced"));

    assert_eq!(
        surface.toasts().last().unwrap().message,
        "Status updated successfully!"
    );

    drain(&mut dashboard).await;
    assert_eq!(dashboard.mirror().get("r1").unwrap().text("status"), Some("resolved"));
    assert_eq!(dashboard.notifications().list().len(), 1);
}

#[tokio::test]
async fn test_fan_out_failure_does_not_undo_update() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;
    backend.fail(Operation::Add, StoreError::PermissionDenied("rules".into()));

    dashboard
        .update_report_status("r2", StatusUpdate::new("assigned"))
        .await
        .unwrap();

    assert_eq!(
        backend.document("reports", "r2").unwrap().text("status"),
        Some("assigned")
    );
    assert!(backend.records("notifications").is_empty());
    assert_eq!(surface.toasts().last().unwrap().level, ToastLevel::Success);
}

#[tokio::test]
async fn test_status_update_errors() {
    let backend = backend();
    let (mut dashboard, _surface) = dashboard(&backend, OutreachView::new());
    assert!(matches!(
        dashboard
            .update_report_status("r1", StatusUpdate::new("assigned"))
            .await,
        Err(DashboardError::NotAuthorized)
    ));

    let (mut dashboard, _surface) = signed_in(&backend, OutreachView::new()).await;
    assert!(matches!(
        dashboard
            .update_report_status("missing", StatusUpdate::new("assigned"))
            .await,
        Err(DashboardError::UnknownRecord(_))
    ));

    backend.fail(Operation::Update, StoreError::Unavailable("offline".into()));
    assert!(matches!(
        dashboard
            .update_report_status("r1", StatusUpdate::new("assigned"))
            .await,
        Err(DashboardError::Store(StoreError::Unavailable(_)))
    ));
    assert!(backend.records("notifications").is_empty());
}

#[tokio::test]
async fn test_submit_health_record() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, HealthView::new()).await;

    let id = dashboard
        .submit_health_record(fields(json!({"gender": "Female", "stress": true})))
        .await
        .unwrap();

    let stored = backend.document("health", &id).unwrap();
    assert_eq!(stored.text("addedBy"), Some("admin-1@uoe.ac.ke"));
    assert_eq!(stored.text("status"), Some("pending"));
    assert!(stored.timestamp("submissionTimestamp").is_some());
    assert_eq!(
        surface.toasts().last().unwrap().message,
        "Record added successfully!"
    );

    drain(&mut dashboard).await;
    assert_eq!(surface.last_render().unwrap().stat("mental_health"), Some(1));
}

// =============================================================================
// Event loop
// =============================================================================

#[tokio::test]
async fn test_run_applies_ui_events_until_shutdown() {
    let backend = backend();
    backend.insert(
        "notifications",
        Record::from_json(
            "n1",
            json!({"userId": "admin-1", "type": "update", "read": false, "timestamp": 1}),
        ),
    );
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;
    assert_eq!(dashboard.notifications().unread_count(), 1);

    let (tx, rx) = mpsc::channel(8);
    tx.send(UiEvent::FilterChanged(FilterState::default().with_priority("urgent")))
        .await
        .unwrap();
    tx.send(UiEvent::MarkRead("n1".into())).await.unwrap();
    tx.send(UiEvent::Shutdown).await.unwrap();

    dashboard.run(rx).await;

    let view = surface.last_render().unwrap();
    assert_eq!(view.table_rows.len(), 1);
    assert_eq!(view.table_rows[0].id, "r2");
    assert_eq!(
        backend.document("notifications", "n1").unwrap().get("read"),
        Some(&json!(true))
    );
    assert!(!dashboard.is_live());
    assert_eq!(backend.subscriber_count("reports"), 0);
}

#[tokio::test]
async fn test_run_follows_auth_state() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;
    let (tx, rx) = mpsc::channel(8);

    let driver = {
        let backend = backend.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            backend.set_signed_in(None);
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(UiEvent::Shutdown).await;
        }
    };
    tokio::join!(dashboard.run(rx), driver);

    assert_eq!(surface.redirects(), vec!["index.html".to_string()]);
    assert!(dashboard.session().is_none());
}

#[tokio::test]
async fn test_run_does_not_redirect_twice_after_denial() {
    let backend = backend();
    let (mut dashboard, surface) = dashboard(&backend, HealthView::new());
    let (tx, rx) = mpsc::channel(8);

    let driver = {
        let backend = backend.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            backend.set_signed_in(Some(admin("admin-2")));
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(UiEvent::Shutdown).await;
        }
    };
    tokio::join!(dashboard.run(rx), driver);

    assert!(backend.current().is_none());
    assert_eq!(surface.redirects(), vec!["index.html".to_string()]);
}

#[tokio::test]
async fn test_sign_out_event() {
    let backend = backend();
    let (mut dashboard, surface) = signed_in(&backend, OutreachView::new()).await;

    dashboard.handle_event(UiEvent::SignOut).await;
    assert!(backend.current().is_none());
    assert!(!dashboard.is_live());
    assert_eq!(surface.redirects(), vec!["index.html".to_string()]);
}
