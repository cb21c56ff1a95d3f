use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    ConnectionBinding, CreateSessionOptions, Session, SessionError, SessionMetrics,
    SessionRegistry, SessionStats, SessionValidation,
};

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_sessions_per_user: usize,
    pub enforce_ip_binding: bool,
    pub enforce_user_agent_binding: bool,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            max_sessions_per_user: 5,
            enforce_ip_binding: false,
            enforce_user_agent_binding: false,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    id: String,
    user_id: String,
    user_email: Option<String>,
    organization_id: Option<String>,
    tenant_id: Option<String>,
    created: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    login_source: String,
    metadata: serde_json::Map<String, Value>,
    connection_ids: HashSet<String>,
}

impl SessionRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn view(&self) -> Session {
        Session {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            user_email: self.user_email.clone(),
            organization_id: self.organization_id.clone(),
            tenant_id: self.tenant_id.clone(),
            created: self.created,
            last_accessed: self.last_accessed,
            last_activity: self.last_activity,
            expires_at: self.expires_at,
            is_active: true,
            login_source: self.login_source.clone(),
            connection_count: self.connection_ids.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions_created: u64,
    sessions_destroyed: u64,
    connections_created: u64,
    connections_destroyed: u64,
    cleanup_runs: u64,
}

struct Inner {
    sessions: HashMap<String, SessionRecord>,
    connections: HashMap<String, ConnectionBinding>,
    user_sessions: HashMap<String, HashSet<String>>,
    counters: Counters,
    last_cleanup: DateTime<Utc>,
}

/// In-memory session registry. Single-process only: cross-process
/// deployments need an external registry behind the same trait.
pub struct InMemorySessionStore {
    config: SessionStoreConfig,
    inner: Mutex<Inner>,
}

impl InMemorySessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        tracing::info!(
            ttl_secs = config.default_ttl.as_secs(),
            "Session store initialized"
        );
        Self {
            config,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                connections: HashMap::new(),
                user_sessions: HashMap::new(),
                counters: Counters::default(),
                last_cleanup: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only occurs after a panic inside the store itself
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drops expired sessions and their bindings when the cleanup interval
    /// has elapsed. Invoked lazily from the mutating entry points.
    fn maybe_cleanup(&self, inner: &mut Inner) {
        let now = Utc::now();
        let elapsed = (now - inner.last_cleanup)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if elapsed < self.config.cleanup_interval {
            return;
        }
        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            Self::drop_session(inner, id);
        }
        inner.counters.cleanup_runs += 1;
        inner.last_cleanup = now;
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Expired sessions reaped");
        }
    }

    fn drop_session(inner: &mut Inner, session_id: &str) -> bool {
        let record = match inner.sessions.remove(session_id) {
            Some(record) => record,
            None => return false,
        };
        for connection_id in &record.connection_ids {
            if inner.connections.remove(connection_id).is_some() {
                inner.counters.connections_destroyed += 1;
            }
        }
        if let Some(ids) = inner.user_sessions.get_mut(&record.user_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                inner.user_sessions.remove(&record.user_id);
            }
        }
        inner.counters.sessions_destroyed += 1;
        true
    }

    /// Oldest session is evicted once a user reaches the per-user cap.
    fn enforce_user_limit(&self, inner: &mut Inner, user_id: &str) {
        let session_ids = match inner.user_sessions.get(user_id) {
            Some(ids) if ids.len() >= self.config.max_sessions_per_user => ids.clone(),
            _ => return,
        };
        let oldest = session_ids
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .min_by_key(|s| s.created)
            .map(|s| s.id.clone());
        if let Some(id) = oldest {
            tracing::warn!(%user_id, session_id = %id, "Session limit reached, evicting oldest");
            Self::drop_session(inner, &id);
        }
    }
}

impl SessionRegistry for InMemorySessionStore {
    fn create_session(&self, opts: CreateSessionOptions) -> Result<Session, SessionError> {
        let user_id = match opts.user_id {
            Some(id) => id,
            None if opts.auto_authenticate => {
                format!("anon_{}", uuid::Uuid::new_v4().simple())
            }
            None => return Err(SessionError::IdentityRequired),
        };

        let mut inner = self.lock();
        self.maybe_cleanup(&mut inner);
        self.enforce_user_limit(&mut inner, &user_id);

        let now = Utc::now();
        let ttl = opts
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);
        let record = SessionRecord {
            id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            user_id: user_id.clone(),
            user_email: opts.user_email,
            organization_id: opts.organization_id,
            tenant_id: opts.tenant_id,
            created: now,
            last_accessed: now,
            last_activity: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .map_err(|e| SessionError::Internal(e.to_string()))?,
            ip_address: opts.ip_address,
            user_agent: opts.user_agent,
            login_source: opts.login_source.unwrap_or_else(|| "api".to_string()),
            metadata: serde_json::Map::new(),
            connection_ids: HashSet::new(),
        };
        let session = record.view();

        inner
            .user_sessions
            .entry(user_id)
            .or_default()
            .insert(record.id.clone());
        inner.sessions.insert(record.id.clone(), record);
        inner.counters.sessions_created += 1;

        tracing::debug!(session_id = %session.id, user_id = %session.user_id, "Session created");
        Ok(session)
    }

    fn validate_session(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SessionValidation, SessionError> {
        let mut inner = self.lock();
        let now = Utc::now();

        let expired = match inner.sessions.get(session_id) {
            None => return Ok(SessionValidation::invalid("Session not found")),
            Some(record) => record.is_expired(now),
        };
        if expired {
            Self::drop_session(&mut inner, session_id);
            return Ok(SessionValidation::invalid("Session expired"));
        }

        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if self.config.enforce_ip_binding {
            if let (Some(bound), Some(seen)) = (record.ip_address.as_deref(), ip_address) {
                if bound != seen {
                    return Ok(SessionValidation::invalid("IP address mismatch"));
                }
            }
        }
        if self.config.enforce_user_agent_binding {
            if let (Some(bound), Some(seen)) = (record.user_agent.as_deref(), user_agent) {
                if bound != seen {
                    return Ok(SessionValidation::invalid("User agent mismatch"));
                }
            }
        }

        record.last_accessed = now;
        let session = record.view();
        let user_context = session.user_context();
        Ok(SessionValidation::Valid {
            session,
            user_context,
        })
    }

    fn destroy_session(&self, session_id: &str) -> bool {
        let mut inner = self.lock();
        let destroyed = Self::drop_session(&mut inner, session_id);
        if destroyed {
            tracing::debug!(%session_id, "Session destroyed");
        }
        destroyed
    }

    fn bind_connection(
        &self,
        session_id: &str,
        connection_id: &str,
        kind: &str,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        record.connection_ids.insert(connection_id.to_string());

        let now = Utc::now();
        inner.connections.insert(
            connection_id.to_string(),
            ConnectionBinding {
                id: connection_id.to_string(),
                session_id: session_id.to_string(),
                kind: kind.to_string(),
                created: now,
                last_seen: now,
            },
        );
        inner.counters.connections_created += 1;
        tracing::debug!(%session_id, %connection_id, "Connection bound to session");
        Ok(())
    }

    fn remove_connection(&self, connection_id: &str) {
        let mut inner = self.lock();
        let binding = match inner.connections.remove(connection_id) {
            Some(binding) => binding,
            None => return,
        };
        if let Some(record) = inner.sessions.get_mut(&binding.session_id) {
            record.connection_ids.remove(connection_id);
        }
        inner.counters.connections_destroyed += 1;
    }

    fn touch_connection(&self, connection_id: &str) {
        let mut inner = self.lock();
        if let Some(binding) = inner.connections.get_mut(connection_id) {
            binding.last_seen = Utc::now();
        }
    }

    fn update_activity(&self, session_id: &str, activity: Value) {
        let mut inner = self.lock();
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.last_activity = Utc::now();
            if let Value::Object(map) = activity {
                for (key, value) in map {
                    record.metadata.insert(key, value);
                }
            }
        }
    }

    fn get_connections(&self, session_id: &str) -> Vec<ConnectionBinding> {
        let inner = self.lock();
        inner
            .connections
            .values()
            .filter(|binding| binding.session_id == session_id)
            .cloned()
            .collect()
    }

    fn stats(&self) -> SessionStats {
        let inner = self.lock();
        let now = Utc::now();
        let expired = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .count();
        SessionStats {
            total_sessions: inner.sessions.len(),
            active_sessions: inner.sessions.len() - expired,
            expired_sessions: expired,
            total_connections: inner.connections.len(),
        }
    }

    fn metrics(&self) -> SessionMetrics {
        let inner = self.lock();
        SessionMetrics {
            sessions_created: inner.counters.sessions_created,
            sessions_destroyed: inner.counters.sessions_destroyed,
            connections_created: inner.counters.connections_created,
            connections_destroyed: inner.counters.connections_destroyed,
            cleanup_runs: inner.counters.cleanup_runs,
            last_cleanup: inner.last_cleanup,
        }
    }
}
