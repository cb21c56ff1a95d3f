mod store;

pub use store::{InMemorySessionStore, SessionStoreConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User identity resolved once at session-binding time; immutable for the
/// lifetime of the bound connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "organizationId")]
    pub organization_id: Option<String>,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Public view of a session held by the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub user_email: Option<String>,
    pub organization_id: Option<String>,
    pub tenant_id: Option<String>,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub login_source: String,
    pub connection_count: usize,
}

impl Session {
    pub fn user_context(&self) -> UserContext {
        UserContext {
            user_id: self.user_id.clone(),
            organization_id: self.organization_id.clone(),
            tenant_id: self.tenant_id.clone(),
            session_id: self.id.clone(),
        }
    }
}

/// One connection bound to a session. A session may hold several bindings
/// at once (same user, multiple tabs or devices, across carriers).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBinding {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Inputs for session creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionOptions {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub organization_id: Option<String>,
    pub tenant_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub login_source: Option<String>,
    pub auto_authenticate: bool,
    pub ttl_secs: Option<u64>,
}

/// Outcome of validating a session id against the registry.
#[derive(Debug, Clone)]
pub enum SessionValidation {
    Valid {
        session: Session,
        user_context: UserContext,
    },
    Invalid {
        reason: String,
    },
}

impl SessionValidation {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session creation requires a user id when autoAuthenticate is disabled")]
    IdentityRequired,
    #[error("session {0} not found")]
    NotFound(String),
    #[error("internal session store error: {0}")]
    Internal(String),
}

/// Aggregate counters exposed by the health probe and stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub expired_sessions: usize,
    pub total_connections: usize,
}

/// Lifetime counters for operational visibility.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub cleanup_runs: u64,
    pub last_cleanup: DateTime<Utc>,
}

/// Session registry contract consumed by every carrier. Injected so the
/// transports can be exercised against a fake in tests; the crate ships
/// [`InMemorySessionStore`] as the default implementation.
pub trait SessionRegistry: Send + Sync {
    fn create_session(&self, opts: CreateSessionOptions) -> Result<Session, SessionError>;

    /// Validates a session id, optionally cross-checking the caller's IP and
    /// user-agent when the store is configured to enforce binding.
    fn validate_session(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SessionValidation, SessionError>;

    /// Destroys a session. Returns false when the id was unknown. Callers
    /// owning live sockets must close them first; the registry only drops
    /// the bindings.
    fn destroy_session(&self, session_id: &str) -> bool;

    fn bind_connection(
        &self,
        session_id: &str,
        connection_id: &str,
        kind: &str,
    ) -> Result<(), SessionError>;

    /// Unbinds a connection. Safe to call for ids that were never bound, so
    /// connection teardown paths can invoke it unconditionally.
    fn remove_connection(&self, connection_id: &str);

    fn touch_connection(&self, connection_id: &str);

    /// Merges an activity metadata object into the session, last-write-wins
    /// per key, and refreshes the activity timestamp.
    fn update_activity(&self, session_id: &str, activity: Value);

    fn get_connections(&self, session_id: &str) -> Vec<ConnectionBinding>;

    fn stats(&self) -> SessionStats;

    fn metrics(&self) -> SessionMetrics;
}
