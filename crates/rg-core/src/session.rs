//! Per-session business context and its store
//!
//! A [`SessionContext`] is created when a connection is accepted and lives
//! until the room holding it closes. Identity fields are fixed at creation;
//! authentication state and alert-rule counters change while it is live.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

/// Identity of a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Session id (the owner's tunnel id)
    pub session_id: String,
    /// Tenant the user belongs to
    pub tenant_id: String,
    /// User id (email address)
    pub user_id: String,
    /// Application being accessed
    pub app_id: String,
    /// Display name of the application
    pub app_name: String,
    /// Address the client connected from
    pub client_ip: Option<String>,
    /// Whether the session is recorded
    pub recording: bool,
}

/// Mutable state of a live session
#[derive(Debug, Default)]
struct ContextState {
    authenticated: bool,
    server_name: Option<String>,
    counters: HashMap<String, u64>,
}

/// Business context shared by every handler acting on one session
#[derive(Debug)]
pub struct SessionContext {
    identity: SessionIdentity,
    started_at: DateTime<Utc>,
    state: Mutex<ContextState>,
}

impl SessionContext {
    /// Create a context that starts now
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            started_at: Utc::now(),
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.identity.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn app_id(&self) -> &str {
        &self.identity.app_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record that the backend reported the session established.
    ///
    /// Returns `true` only for the first call, so callers can emit the
    /// open event exactly once.
    pub fn mark_authenticated(&self, server_name: &str) -> bool {
        let mut state = self.state.lock();
        if state.authenticated {
            return false;
        }
        state.authenticated = true;
        state.server_name = Some(server_name.to_string());
        true
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    /// Target name reported by the backend
    pub fn server_name(&self) -> Option<String> {
        self.state.lock().server_name.clone()
    }

    /// Add `amount` to the counter for `action` and return the new total
    pub fn increment(&self, action: &str, amount: u64) -> u64 {
        let mut state = self.state.lock();
        let counter = state.counters.entry(action.to_string()).or_insert(0);
        *counter = counter.saturating_add(amount);
        *counter
    }

    /// Current total for `action`
    pub fn counter(&self, action: &str) -> u64 {
        self.state.lock().counters.get(action).copied().unwrap_or(0)
    }
}

/// Concurrent store keyed by session id.
///
/// Optimised for many readers: lookups take a shared lock, inserts and
/// removals an exclusive one.
pub struct SessionDataStore<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> SessionDataStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&self, key: impl Into<String>, value: T) -> Option<Arc<T>> {
        self.entries.write().insert(key.into(), Arc::new(value))
    }

    /// Insert a value already shared with the caller
    pub fn insert_shared(&self, key: impl Into<String>, value: Arc<T>) -> Option<Arc<T>> {
        self.entries.write().insert(key.into(), value)
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Remove a value by key
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.entries.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T> Default for SessionDataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
