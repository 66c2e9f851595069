//! Rendering surface seam

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::notifications::Notification;
use crate::session::DisplayIdentity;
use crate::views::DerivedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient message shown to the admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Error, message)
    }
}

/// Whatever draws the dashboard: DOM, terminal, test recorder
pub trait RenderSurface: Send {
    fn render(&mut self, view: &DerivedView);

    fn render_notifications(
        &mut self,
        notifications: &[Notification],
        unread: usize,
        badge: Option<&str>,
    );

    fn toast(&mut self, toast: Toast);

    /// Popup for a newly arrived notification
    fn alert_notification(&mut self, notification: &Notification);

    /// Navigate away, e.g. to the login entry
    fn redirect(&mut self, target: &str);

    fn show_identity(&mut self, identity: &DisplayIdentity);
}

/// One call made on a [`RecordingSurface`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", content = "data", rename_all = "snake_case")]
pub enum SurfaceCall {
    Render(DerivedView),
    Notifications {
        notifications: Vec<Notification>,
        unread: usize,
        badge: Option<String>,
    },
    Toast(Toast),
    Alert(Notification),
    Redirect(String),
    Identity(DisplayIdentity),
}

/// Surface that records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: SurfaceCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn renders(&self) -> Vec<DerivedView> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Render(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    pub fn last_render(&self) -> Option<DerivedView> {
        self.renders().pop()
    }

    /// Latest notification list with its unread count and badge
    pub fn last_notifications(&self) -> Option<(Vec<Notification>, usize, Option<String>)> {
        self.calls().into_iter().rev().find_map(|c| match c {
            SurfaceCall::Notifications {
                notifications,
                unread,
                badge,
            } => Some((notifications, unread, badge)),
            _ => None,
        })
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Toast(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<Notification> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Alert(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Redirect(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RenderSurface for RecordingSurface {
    fn render(&mut self, view: &DerivedView) {
        self.push(SurfaceCall::Render(view.clone()));
    }

    fn render_notifications(
        &mut self,
        notifications: &[Notification],
        unread: usize,
        badge: Option<&str>,
    ) {
        self.push(SurfaceCall::Notifications {
            notifications: notifications.to_vec(),
            unread,
            badge: badge.map(str::to_string),
        });
    }

    fn toast(&mut self, toast: Toast) {
        self.push(SurfaceCall::Toast(toast));
    }

    fn alert_notification(&mut self, notification: &Notification) {
        self.push(SurfaceCall::Alert(notification.clone()));
    }

    fn redirect(&mut self, target: &str) {
        self.push(SurfaceCall::Redirect(target.to_string()));
    }

    fn show_identity(&mut self, identity: &DisplayIdentity) {
        self.push(SurfaceCall::Identity(identity.clone()));
    }
}
