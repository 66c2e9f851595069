//! campus-dashboards: live department dashboards for the incident and health reporting system
//!
//! Each dashboard authenticates an administrator, keeps a live mirror of a remote document
//! collection and recomputes its statistics, table rows and breakdowns on every change.
//!
//! ## Subsystems
//!
//! - **Session**: department authorization guard and the login flow with bounded retry
//! - **Sync**: delta streams, cancellable subscriptions and the collection mirror
//! - **Views**: per-department derived view recomputation
//! - **Notifications**: per-user notification mirror with read/dismiss operations
//! - **Dashboard**: the owned dashboard instance tying the above to a rendering surface
//!
//! Persistence, querying and identity are delegated to the collaborators behind the
//! [`backend`] traits; [`backend::memory`] provides an in-process implementation.

pub mod backend;
pub mod config;
pub mod dashboard;
pub mod logging;
pub mod notifications;
pub mod record;
pub mod session;
pub mod sync;
pub mod views;

pub use config::Config;
pub use dashboard::{Dashboard, RenderSurface, Toast, ToastLevel, UiEvent};
pub use record::Record;
pub use session::{Department, SessionGuard, SessionOutcome};
pub use sync::{Delta, DeltaBatch, LiveMirror, Mirror};
pub use views::{recompute, DerivedView, FilterState, ViewSpec};
