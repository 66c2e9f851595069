//! Backend collaborators - identity provider and document store
//!
//! The dashboards never persist, index or authenticate anything themselves. These traits
//! describe the hosted services they consume:
//! - Identity: password sign-in, sign-out and an auth-state stream
//! - Documents: point reads/writes, atomic batches, queries and live subscriptions
//!
//! [`memory::MemoryBackend`] implements both in-process.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::watch;

use crate::record::Record;
use crate::sync::Subscription;

/// Marker key used by [`server_timestamp`].
pub const SERVER_TIMESTAMP_KEY: &str = "__serverTimestamp";

/// Field value replaced by the store's clock when the write is applied.
pub fn server_timestamp() -> JsonValue {
    let mut marker = Map::new();
    marker.insert(SERVER_TIMESTAMP_KEY.to_string(), JsonValue::Bool(true));
    JsonValue::Object(marker)
}

pub fn is_server_timestamp(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.len() == 1 && o.contains_key(SERVER_TIMESTAMP_KEY))
}

/// An authenticated identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// Where a point read may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadSource {
    /// Cache first, then server
    #[default]
    Default,
    Cache,
    Server,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Collection query with equality filters, ordering and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, JsonValue)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn order_by_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Equality filters only; ordering and limit apply to the result set.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Update {
        collection: String,
        id: String,
        fields: Map<String, JsonValue>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Document store errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Store error code as reported by the hosted service
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::PermissionDenied(_) => "permission-denied",
            Self::Unavailable(_) => "unavailable",
            Self::FailedPrecondition(_) => "failed-precondition",
            Self::Aborted(_) => "aborted",
            Self::Internal(_) => "internal",
        }
    }
}

/// Identity provider errors, one variant per provider error code
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("User disabled")]
    UserDisabled,

    #[error("User not found")]
    UserNotFound,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Network request failed")]
    NetworkRequestFailed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{code}: {message}")]
    Other { code: String, message: String },
}

impl AuthError {
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidEmail => "auth/invalid-email",
            Self::UserDisabled => "auth/user-disabled",
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::NetworkRequestFailed => "auth/network-request-failed",
            Self::Internal(_) => "auth/internal-error",
            Self::Other { code, .. } => code,
        }
    }

    /// Transient failures worth retrying. Rate limiting is not one of them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkRequestFailed | Self::Internal(_))
    }

    /// Message shown to the administrator on the login form
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidEmail => "Invalid email address format.".to_string(),
            Self::UserDisabled => {
                "This account has been disabled. Contact system administrator.".to_string()
            }
            Self::UserNotFound => "No account found with this email address.".to_string(),
            Self::WrongPassword => "Incorrect password. Please try again.".to_string(),
            Self::TooManyRequests => {
                "Too many failed attempts. Please try again in 15 minutes.".to_string()
            }
            Self::NetworkRequestFailed => {
                "Network error. Please check your connection and try again.".to_string()
            }
            Self::Internal(_) => "An unexpected error occurred. Please try again.".to_string(),
            Self::Other { message, .. } => format!("Authentication error: {}", message),
        }
    }
}

/// Hosted identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    fn current(&self) -> Option<Identity>;

    /// Auth state stream: `None` when signed out
    fn auth_state(&self) -> watch::Receiver<Option<Identity>>;
}

/// Hosted document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        source: ReadSource,
    ) -> Result<Option<Record>, StoreError>;

    /// Insert a new document and return its generated id
    async fn add(&self, collection: &str, fields: Map<String, JsonValue>)
        -> Result<String, StoreError>;

    /// Merge `fields` into an existing document
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Apply every write or none of them
    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Live subscription: an initial snapshot of `Added` deltas, then incremental batches
    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError>;
}
