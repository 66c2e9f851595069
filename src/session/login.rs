//! Login flow
//!
//! Password sign-in with bounded retry for transient provider failures, followed by the
//! same fail-closed department check the dashboards run. A successful login yields a
//! [`SessionRecord`] with a fixed lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{Department, RedirectReason, SessionGuard, SessionOutcome};
use crate::backend::{AuthError, DocumentStore, Identity, IdentityProvider};
use crate::config::LoginConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Access denied to {department}: {reason}")]
    AccessDenied {
        department: Department,
        reason: RedirectReason,
    },

    #[error("Invalid login form: {0}")]
    Validation(String),

    #[error("A login attempt is already in progress")]
    AlreadyAuthenticating,
}

impl LoginError {
    /// Message shown on the login form
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(e) => e.user_message(),
            Self::AccessDenied {
                department,
                reason: RedirectReason::LookupTimedOut,
            } => format!(
                "Permission check for the {} took too long. Please try again.",
                department.display_name()
            ),
            Self::AccessDenied { department, .. } => format!(
                "Access denied. You don't have permission to access the {}.",
                department.display_name()
            ),
            Self::Validation(msg) => msg.clone(),
            Self::AlreadyAuthenticating => "Please wait for current login to complete".to_string(),
        }
    }
}

/// Credentials as typed into the login form. The password is wiped on drop.
pub struct LoginForm {
    pub email: String,
    password: Zeroizing<String>,
}

impl LoginForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Wipe the password field
    pub fn clear_password(&mut self) {
        self.password = Zeroizing::new(String::new());
    }

    pub fn validate(&self) -> Result<(), LoginError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(LoginError::Validation("Email is required".into()));
        }
        if !looks_like_email(email) {
            return Err(LoginError::Validation(
                "Please enter a valid email address".into(),
            ));
        }
        if self.password.is_empty() {
            return Err(LoginError::Validation("Password is required".into()));
        }
        if self.password.chars().count() < 6 {
            return Err(LoginError::Validation(
                "Password must be at least 6 characters".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// `local@domain.tld` with no whitespace and a single `@`
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Stored after a successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub email: String,
    pub department: Department,
    pub login_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        identity: &Identity,
        department: Department,
        now: DateTime<Utc>,
        ttl: std::time::Duration,
    ) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(2));
        Self {
            user_id: identity.uid.clone(),
            email: identity.email.clone(),
            department,
            login_time: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Clears the in-progress flag when a login attempt ends, however it ends
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Login screen logic
pub struct LoginFlow {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    config: LoginConfig,
    authenticating: AtomicBool,
}

impl LoginFlow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: LoginConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
            authenticating: AtomicBool::new(false),
        }
    }

    pub fn is_authenticating(&self) -> bool {
        self.authenticating.load(Ordering::Acquire)
    }

    fn guard(&self, department: Department) -> SessionGuard {
        SessionGuard::new(self.store.clone(), self.identity.clone(), department)
            .with_authorization_collection(&self.config.authorization_collection)
            .with_timeout(self.config.access_check_timeout())
    }

    /// Sign in and check access to `department`.
    ///
    /// The password is wiped from `form` whenever this returns an error.
    pub async fn login(
        &self,
        form: &mut LoginForm,
        department: Department,
    ) -> Result<SessionRecord, LoginError> {
        if self
            .authenticating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Login attempt blocked, already authenticating");
            return Err(LoginError::AlreadyAuthenticating);
        }
        let _attempt = AttemptGuard(&self.authenticating);

        let result = self.login_inner(form, department).await;
        if result.is_err() {
            form.clear_password();
        }
        result
    }

    async fn login_inner(
        &self,
        form: &LoginForm,
        department: Department,
    ) -> Result<SessionRecord, LoginError> {
        form.validate()?;
        let email = form.email.trim();
        info!(email, %department, "Login submitted");

        let identity = self.sign_in_with_retry(email, form.password()).await?;

        match self.guard(department).authorize(Some(identity.clone())).await {
            SessionOutcome::Authorized(session) => {
                info!(uid = %session.identity.uid, %department, "Login complete");
                Ok(SessionRecord::new(
                    &identity,
                    department,
                    Utc::now(),
                    self.config.session_ttl(),
                ))
            }
            SessionOutcome::Redirect { reason } => {
                Err(LoginError::AccessDenied { department, reason })
            }
        }
    }

    async fn sign_in_with_retry(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.identity.sign_in(email, password).await {
                Ok(identity) => return Ok(identity),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.backoff_base() * attempt;
                    warn!(
                        attempt,
                        max_attempts,
                        code = e.code(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Sign-in failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, code = e.code(), "Sign-in failed");
                    return Err(e);
                }
            }
        }
    }

    /// Pick a dashboard for an identity that is already signed in.
    ///
    /// Returns `None` after signing out when the identity holds no department or its
    /// authorization cannot be read.
    pub async fn resume(&self, identity: &Identity) -> Option<SessionRecord> {
        let guard = self.guard(Department::Health);
        let department = match guard.lookup(&identity.uid).await {
            Ok(granted) => Department::pick(&granted),
            Err(reason) => {
                warn!(uid = %identity.uid, %reason, "Session restore failed");
                None
            }
        };

        match department {
            Some(department) => {
                info!(uid = %identity.uid, %department, "Resuming existing session");
                Some(SessionRecord::new(
                    identity,
                    department,
                    Utc::now(),
                    self.config.session_ttl(),
                ))
            }
            None => {
                if let Err(e) = self.identity.sign_out().await {
                    warn!(error = %e, "Sign-out failed");
                }
                None
            }
        }
    }
}
