//! Session guard - department authorization for dashboards
//!
//! An auth-state change either carries no identity (signed out) or an identity whose
//! authorization record must list the dashboard's department. Any failure to read that
//! record, including a slow read, denies access and signs the identity out.

pub mod login;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{DocumentStore, Identity, IdentityProvider, ReadSource};
use crate::record::Record;

pub use login::{LoginError, LoginFlow, LoginForm, SessionRecord};

/// Collection holding one authorization record per administrator uid
pub const DEFAULT_AUTHORIZATION_COLLECTION: &str = "adminUsers";

/// Default access-check timeout
pub const DEFAULT_ACCESS_CHECK_TIMEOUT: Duration = Duration::from_millis(5000);

/// University departments with an admin dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Department {
    Health,
    Security,
    Estate,
    Deans,
    Outreach,
}

impl Department {
    /// Order used to pick a dashboard when an admin holds several departments
    pub const REDIRECT_PRIORITY: [Department; 5] = [
        Department::Health,
        Department::Security,
        Department::Estate,
        Department::Deans,
        Department::Outreach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Security => "security",
            Self::Estate => "estate",
            Self::Deans => "deans",
            Self::Outreach => "outreach",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Health => "Health Department",
            Self::Security => "Security Department",
            Self::Estate => "Estate Department",
            Self::Deans => "Deans Office",
            Self::Outreach => "Outreach Department",
        }
    }

    /// Page the login screen redirects to
    pub fn dashboard_page(&self) -> String {
        format!("Dashboard-{}.html", self.as_str())
    }

    /// Highest-priority department in `granted`
    pub fn pick(granted: &[Department]) -> Option<Department> {
        Self::REDIRECT_PRIORITY
            .into_iter()
            .find(|d| granted.contains(d))
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown department: {0}")]
pub struct UnknownDepartment(pub String);

impl FromStr for Department {
    type Err = UnknownDepartment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "health" => Ok(Self::Health),
            "security" => Ok(Self::Security),
            "estate" => Ok(Self::Estate),
            "deans" => Ok(Self::Deans),
            "outreach" => Ok(Self::Outreach),
            _ => Err(UnknownDepartment(s.to_string())),
        }
    }
}

/// Departments listed in an authorization record. Unknown names are skipped.
pub fn granted_departments(record: &Record) -> Vec<Department> {
    record
        .get("departments")
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// What the dashboard header shows for the signed-in admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayIdentity {
    pub email: String,
    pub display_name: String,
    pub initials: String,
}

impl DisplayIdentity {
    pub fn from_email(email: &str) -> Self {
        let local = email.split('@').next().unwrap_or_default();
        let initials = local.chars().take(2).collect::<String>().to_uppercase();
        Self {
            email: email.to_string(),
            display_name: local.to_string(),
            initials,
        }
    }
}

/// An identity authorized for one department
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub identity: Identity,
    pub department: Department,
    /// Every department the authorization record grants
    pub granted: Vec<Department>,
    pub display: DisplayIdentity,
}

/// Why a dashboard must send the browser back to the login entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    SignedOut,
    NoAuthorizationRecord,
    DepartmentNotGranted,
    LookupFailed,
    LookupTimedOut,
}

impl fmt::Display for RedirectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SignedOut => "signed out",
            Self::NoAuthorizationRecord => "no authorization record",
            Self::DepartmentNotGranted => "department not granted",
            Self::LookupFailed => "authorization lookup failed",
            Self::LookupTimedOut => "authorization lookup timed out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Authorized(AdminSession),
    Redirect { reason: RedirectReason },
}

impl SessionOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    pub fn session(&self) -> Option<&AdminSession> {
        match self {
            Self::Authorized(session) => Some(session),
            Self::Redirect { .. } => None,
        }
    }
}

/// Verifies that an identity may open one department's dashboard.
pub struct SessionGuard {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    department: Department,
    authorization_collection: String,
    timeout: Duration,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        department: Department,
    ) -> Self {
        Self {
            store,
            identity,
            department,
            authorization_collection: DEFAULT_AUTHORIZATION_COLLECTION.to_string(),
            timeout: DEFAULT_ACCESS_CHECK_TIMEOUT,
        }
    }

    pub fn with_authorization_collection(mut self, collection: impl Into<String>) -> Self {
        self.authorization_collection = collection.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn department(&self) -> Department {
        self.department
    }

    pub fn identity_provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Resolve an auth-state change. Unauthorized identities are signed out.
    pub async fn authorize(&self, state: Option<Identity>) -> SessionOutcome {
        let Some(identity) = state else {
            debug!(department = %self.department, "No identity, redirecting to login");
            return SessionOutcome::Redirect {
                reason: RedirectReason::SignedOut,
            };
        };

        let granted = match self.lookup(&identity.uid).await {
            Ok(granted) => granted,
            Err(reason) => return self.deny(&identity, reason).await,
        };

        if !granted.contains(&self.department) {
            return self
                .deny(&identity, RedirectReason::DepartmentNotGranted)
                .await;
        }

        info!(uid = %identity.uid, department = %self.department, "Dashboard access granted");
        let display = DisplayIdentity::from_email(&identity.email);
        SessionOutcome::Authorized(AdminSession {
            identity,
            department: self.department,
            granted,
            display,
        })
    }

    /// Departments granted to `uid`, fail-closed on any lookup problem.
    pub async fn lookup(&self, uid: &str) -> Result<Vec<Department>, RedirectReason> {
        let read = self
            .store
            .get(&self.authorization_collection, uid, ReadSource::Default);

        match tokio::time::timeout(self.timeout, read).await {
            Err(_) => {
                warn!(uid, timeout_ms = self.timeout.as_millis() as u64, "Access check timed out");
                Err(RedirectReason::LookupTimedOut)
            }
            Ok(Err(e)) => {
                warn!(uid, error = %e, "Access check failed");
                Err(RedirectReason::LookupFailed)
            }
            Ok(Ok(None)) => Err(RedirectReason::NoAuthorizationRecord),
            Ok(Ok(Some(record))) => Ok(granted_departments(&record)),
        }
    }

    async fn deny(&self, identity: &Identity, reason: RedirectReason) -> SessionOutcome {
        warn!(
            uid = %identity.uid,
            department = %self.department,
            %reason,
            "Dashboard access denied, signing out"
        );
        if let Err(e) = self.identity.sign_out().await {
            warn!(error = %e, "Sign-out after denied access failed");
        }
        SessionOutcome::Redirect { reason }
    }
}
