//! Dashboard instance
//!
//! One [`Dashboard`] owns everything a department dashboard mutates: the collection
//! mirror with its live subscription, the filter state, the notification sub-mirror and
//! the authorized session. Remote changes flow in through [`Dashboard::step`]; user
//! actions arrive as [`UiEvent`]s. Every subscription replacement cancels the old handle
//! before any state for the new one is touched.

mod actions;
mod surface;

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backend::{DocumentStore, Identity, IdentityProvider, Query, StoreError};
use crate::config::Config;
use crate::notifications::{NotificationCenter, NotificationError, NotificationEvent};
use crate::session::{AdminSession, SessionGuard, SessionOutcome};
use crate::sync::{BatchSummary, LiveMirror, Mirror, MirrorEvent};
use crate::views::{recompute, DerivedView, FilterState, ViewSpec};

pub use actions::StatusUpdate;
pub use surface::{RecordingSurface, RenderSurface, SurfaceCall, Toast, ToastLevel};

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("No authorized session")]
    NotAuthorized,

    #[error("Unknown record: {0}")]
    UnknownRecord(String),
}

/// User actions emitted by the rendering surface
#[derive(Debug, Clone)]
pub enum UiEvent {
    FilterChanged(FilterState),
    MarkRead(String),
    MarkAllRead,
    Dismiss(String),
    ClearNotifications,
    UpdateStatus { id: String, update: StatusUpdate },
    SubmitRecord(Map<String, JsonValue>),
    SignOut,
    Shutdown,
}

/// What one [`Dashboard::step`] processed
#[derive(Debug, Clone)]
pub enum StepEvent {
    /// A collection batch was applied and the view re-rendered
    RecordsChanged(BatchSummary),
    /// A notification batch was applied; `alerts` popups were raised
    NotificationsChanged { alerts: usize },
    ListenerError(StoreError),
    /// A live stream ended without being cancelled
    StreamClosed,
}

enum Pumped {
    Records(Option<MirrorEvent>),
    Notifications(Option<NotificationEvent>),
}

/// A department dashboard bound to one rendering surface
pub struct Dashboard<V: ViewSpec> {
    spec: V,
    store: Arc<dyn DocumentStore>,
    guard: SessionGuard,
    surface: Box<dyn RenderSurface>,
    config: Config,
    live: LiveMirror,
    filter: FilterState,
    notifications: NotificationCenter,
    session: Option<AdminSession>,
    view: Option<DerivedView>,
    /// Set once the surface was sent to the login entry; cleared on authorization
    redirected: bool,
}

impl<V: ViewSpec> Dashboard<V> {
    pub fn new(
        spec: V,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        surface: Box<dyn RenderSurface>,
        config: Config,
    ) -> Self {
        let guard = SessionGuard::new(store.clone(), identity, spec.department())
            .with_authorization_collection(&config.login.authorization_collection)
            .with_timeout(config.login.access_check_timeout());
        let notifications = NotificationCenter::new(store.clone(), config.notifications.clone());
        let live = LiveMirror::new(spec.order_field());

        Self {
            spec,
            store,
            guard,
            surface,
            config,
            live,
            filter: FilterState::default(),
            notifications,
            session: None,
            view: None,
            redirected: false,
        }
    }

    pub fn spec(&self) -> &V {
        &self.spec
    }

    pub fn mirror(&self) -> &Mirror {
        self.live.mirror()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn session(&self) -> Option<&AdminSession> {
        self.session.as_ref()
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Last rendered view
    pub fn view(&self) -> Option<&DerivedView> {
        self.view.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live() || self.notifications.is_live()
    }

    /// Live query for this dashboard's collection, newest first and unlimited
    pub fn default_query(&self) -> Query {
        Query::collection(self.spec.collection()).order_by_desc(self.spec.order_field())
    }

    /// React to an auth-state change.
    ///
    /// On success the previous subscriptions are stopped and exactly one collection and
    /// one notification subscription are started. Otherwise everything is torn down and
    /// the surface is redirected to the login entry.
    pub async fn handle_auth_state(
        &mut self,
        state: Option<Identity>,
    ) -> Result<SessionOutcome, DashboardError> {
        let outcome = self.guard.authorize(state).await;

        let session = match &outcome {
            SessionOutcome::Authorized(session) => session.clone(),
            SessionOutcome::Redirect { reason } => {
                info!(department = %self.spec.department(), %reason, "Redirecting to login");
                self.teardown();
                self.redirect_to_login();
                return Ok(outcome);
            }
        };

        self.teardown();
        self.redirected = false;
        self.surface.show_identity(&session.display);
        let uid = session.identity.uid.clone();
        self.session = Some(session);

        let query = self.default_query();
        if let Err(e) = self.subscribe(&query).await {
            error!(error = %e, collection = %query.collection, "Failed to start live data");
            self.surface
                .toast(Toast::error(format!("Failed to load data: {}", e)));
            return Err(e);
        }

        if let Err(e) = self.notifications.start(&uid).await {
            warn!(error = %e, "Failed to start notifications");
            self.surface
                .toast(Toast::error("Failed to load notifications"));
        }
        self.render_notifications();

        Ok(outcome)
    }

    /// Seed from a one-shot query, then follow the live subscription.
    ///
    /// The seed is capped at `initial_limit` unless `query` carries its own limit. The
    /// subscription snapshot then replaces the seed.
    async fn subscribe(&mut self, query: &Query) -> Result<(), DashboardError> {
        self.live.reset();
        let mut seed_query = query.clone();
        seed_query.limit = query.limit.or(Some(self.config.dashboard.initial_limit));
        let initial = self.store.query(&seed_query).await?;
        let subscription = self.store.subscribe(query).await?;

        self.live.replace(subscription);
        self.live.seed(initial);
        debug!(
            collection = %query.collection,
            size = self.live.mirror().len(),
            "Live data started"
        );
        self.refresh();
        Ok(())
    }

    /// Replace the collection query: cancel, clear, resubscribe.
    pub async fn set_scope(&mut self, query: Query) -> Result<(), DashboardError> {
        if self.session.is_none() {
            return Err(DashboardError::NotAuthorized);
        }
        info!(collection = %query.collection, limit = ?query.limit, "Changing live scope");
        self.subscribe(&query).await
    }

    pub fn set_filter(&mut self, filter: FilterState) {
        self.filter = filter;
        self.refresh();
    }

    /// Recompute once from the current mirror and render
    fn refresh(&mut self) {
        let view = recompute(&self.spec, self.live.mirror(), &self.filter);
        self.surface.render(&view);
        self.view = Some(view);
    }

    fn render_notifications(&mut self) {
        let list = self.notifications.list();
        let unread = self.notifications.unread_count();
        let badge = self.notifications.badge();
        self.surface
            .render_notifications(&list, unread, badge.as_deref());
    }

    /// Wait for one event on either live stream and process it.
    ///
    /// Returns `None` when neither stream is live.
    pub async fn step(&mut self) -> Option<StepEvent> {
        let records_live = self.live.is_live();
        let notifications_live = self.notifications.is_live();

        let pumped = tokio::select! {
            event = self.live.next_change(), if records_live => Pumped::Records(event),
            event = self.notifications.next_change(), if notifications_live => {
                Pumped::Notifications(event)
            }
            else => return None,
        };

        let step = match pumped {
            Pumped::Records(Some(MirrorEvent::Changed(summary))) => {
                self.refresh();
                StepEvent::RecordsChanged(summary)
            }
            Pumped::Records(Some(MirrorEvent::ListenerError(e)))
            | Pumped::Notifications(Some(NotificationEvent::ListenerError(e))) => {
                error!(error = %e, code = e.code(), "Listener error");
                self.surface
                    .toast(Toast::warning("Connection issue. Live updates may be delayed."));
                StepEvent::ListenerError(e)
            }
            Pumped::Notifications(Some(NotificationEvent::Changed { alerts })) => {
                for alert in &alerts {
                    self.surface.alert_notification(alert);
                }
                self.render_notifications();
                StepEvent::NotificationsChanged {
                    alerts: alerts.len(),
                }
            }
            Pumped::Records(None) | Pumped::Notifications(None) => {
                warn!("Live stream closed");
                StepEvent::StreamClosed
            }
        };
        Some(step)
    }

    /// Event loop over live streams, auth-state changes and UI events.
    ///
    /// Stops on [`UiEvent::Shutdown`] or when the UI channel closes.
    pub async fn run(&mut self, mut events: mpsc::Receiver<UiEvent>) {
        let mut auth = self.guard.identity_provider().auth_state();
        auth.borrow_and_update();
        let mut auth_open = true;

        loop {
            let live = self.is_live();
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(UiEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
                changed = auth.changed(), if auth_open => {
                    if changed.is_err() {
                        auth_open = false;
                        continue;
                    }
                    let state = auth.borrow_and_update().clone();
                    if let Err(e) = self.handle_auth_state(state).await {
                        warn!(error = %e, "Auth state change failed");
                    }
                }
                _ = self.step(), if live => {}
            }
        }

        self.teardown();
        info!(department = %self.spec.department(), "Dashboard stopped");
    }

    /// Apply one UI event. Failures are reported on the surface.
    pub async fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::FilterChanged(filter) => self.set_filter(filter),
            UiEvent::MarkRead(id) => self.mark_read(&id).await,
            UiEvent::MarkAllRead => self.mark_all_read().await,
            UiEvent::Dismiss(id) => self.dismiss(&id).await,
            UiEvent::ClearNotifications => self.clear_notifications().await,
            UiEvent::UpdateStatus { id, update } => {
                if let Err(e) = self.update_report_status(&id, update).await {
                    self.surface
                        .toast(Toast::error(format!("Failed to update status: {}", e)));
                }
            }
            UiEvent::SubmitRecord(fields) => {
                if let Err(e) = self.submit_health_record(fields).await {
                    self.surface
                        .toast(Toast::error(format!("Failed to add record: {}", e)));
                }
            }
            UiEvent::SignOut => self.sign_out().await,
            UiEvent::Shutdown => self.teardown(),
        }
    }

    /// Cancel every live handle and forget the session
    pub fn teardown(&mut self) {
        self.live.reset();
        self.notifications.stop();
        self.session = None;
    }

    async fn sign_out(&mut self) {
        if let Err(e) = self.guard.identity_provider().sign_out().await {
            warn!(error = %e, "Sign-out failed");
            self.surface
                .toast(Toast::error("Error signing out. Please try again."));
            return;
        }
        self.teardown();
        self.redirect_to_login();
    }

    /// Send the surface to the login entry at most once per signed-out stretch
    fn redirect_to_login(&mut self) {
        if self.redirected {
            debug!("Already redirected to login");
            return;
        }
        self.redirected = true;
        self.surface.redirect(&self.config.login.login_entry);
    }

    pub async fn mark_read(&mut self, id: &str) {
        if let Err(e) = self.notifications.mark_as_read(id).await {
            warn!(id, error = %e, "Mark as read rejected");
            self.surface.toast(Toast::error(e.to_string()));
        }
        self.render_notifications();
    }

    pub async fn mark_all_read(&mut self) {
        match self.notifications.mark_all_as_read().await {
            Ok(0) => {}
            Ok(count) => self
                .surface
                .toast(Toast::success(format!("Marked {} notifications as read", count))),
            Err(e) => {
                warn!(error = %e, "Mark all as read failed");
                self.surface
                    .toast(Toast::error("Failed to mark notifications as read"));
            }
        }
        self.render_notifications();
    }

    pub async fn dismiss(&mut self, id: &str) {
        if let Err(e) = self.notifications.dismiss(id).await {
            warn!(id, error = %e, "Dismiss failed");
            self.surface
                .toast(Toast::error("Failed to dismiss notification"));
        }
        self.render_notifications();
    }

    pub async fn clear_notifications(&mut self) {
        match self.notifications.clear_all().await {
            Ok(count) if count > 0 => self
                .surface
                .toast(Toast::success("All notifications cleared")),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Clear notifications failed");
                self.surface
                    .toast(Toast::error("Failed to clear notifications"));
            }
        }
        self.render_notifications();
    }
}
