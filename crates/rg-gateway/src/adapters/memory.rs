//! In-process collaborators
//!
//! [`MemoryBackend`] keeps sessions, grants, routes, recordings and emitted
//! events in memory. It backs a standalone gateway and every test; the
//! inspection methods expose what the gateway did.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use rg_core::traits::{
    ActiveSession, AuditEvent, AuditSink, DlpJob, DlpSink, Invitation, Mailer, PolicyDecision,
    PolicyFetcher, QuotaPolicy, QuotaRequest, RecordingJob, RecordingQueue, RouteCache,
    SessionRepository, ShareGrant, TenantRecord, UserDirectory, UserRecord,
};
use rg_core::{CollaboratorError, TransferAction};

#[derive(Default)]
struct Store {
    sessions: HashMap<String, ActiveSession>,
    deleted_sessions: Vec<String>,
    grants: HashMap<(String, String), ShareGrant>,
    users: HashMap<String, UserRecord>,
    tenants: HashMap<String, TenantRecord>,
    routes: HashMap<String, (String, Option<Instant>)>,
    recordings: Vec<VecDeque<RecordingJob>>,
    audit: Vec<AuditEvent>,
    dlp: Vec<DlpJob>,
    invitations: Vec<Invitation>,
}

/// Every storage-like collaborator, in memory
pub struct MemoryBackend {
    store: Mutex<Store>,
    next_queue: AtomicUsize,
    fail_persistence: AtomicBool,
}

impl MemoryBackend {
    /// Backend with a single recording queue
    pub fn new() -> Self {
        Self::with_queue_count(1)
    }

    pub fn with_queue_count(queue_count: usize) -> Self {
        let store = Store {
            recordings: vec![VecDeque::new(); queue_count.max(1)],
            ..Store::default()
        };
        Self {
            store: Mutex::new(store),
            next_queue: AtomicUsize::new(0),
            fail_persistence: AtomicBool::new(false),
        }
    }

    /// Make every repository call fail until reset
    pub fn set_fail_persistence(&self, fail: bool) {
        self.fail_persistence.store(fail, Ordering::SeqCst);
    }

    fn check_persistence(&self) -> Result<(), CollaboratorError> {
        if self.fail_persistence.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Persistence("store unavailable".to_string()));
        }
        Ok(())
    }

    pub fn add_user(&self, user: UserRecord) {
        self.store.lock().users.insert(user.user_id.clone(), user);
    }

    pub fn add_tenant(&self, tenant: TenantRecord) {
        self.store
            .lock()
            .tenants
            .insert(tenant.tenant_id.clone(), tenant);
    }

    pub fn active_session(&self, session_id: &str) -> Option<ActiveSession> {
        self.store.lock().sessions.get(session_id).cloned()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.store.lock().deleted_sessions.clone()
    }

    pub fn grant(&self, session_id: &str, user_id: &str) -> Option<ShareGrant> {
        self.store
            .lock()
            .grants
            .get(&(session_id.to_string(), user_id.to_string()))
            .cloned()
    }

    /// Cached route, ignoring expiry
    pub fn route(&self, key: &str) -> Option<String> {
        self.store.lock().routes.get(key).map(|(v, _)| v.clone())
    }

    /// Jobs of every queue, oldest first within a queue
    pub fn queued_recordings(&self) -> Vec<RecordingJob> {
        self.store
            .lock()
            .recordings
            .iter()
            .flat_map(|q| q.iter().cloned())
            .collect()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.store.lock().audit.clone()
    }

    pub fn dlp_jobs(&self) -> Vec<DlpJob> {
        self.store.lock().dlp.clone()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.store.lock().invitations.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for MemoryBackend {
    async fn save_active_session(&self, session: &ActiveSession) -> Result<(), CollaboratorError> {
        self.check_persistence()?;
        self.store
            .lock()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_active_session(&self, session_id: &str) -> Result<(), CollaboratorError> {
        self.check_persistence()?;
        let mut store = self.store.lock();
        store.sessions.remove(session_id);
        store.deleted_sessions.push(session_id.to_string());
        Ok(())
    }

    async fn share_session(&self, grant: &ShareGrant) -> Result<(), CollaboratorError> {
        self.check_persistence()?;
        self.store.lock().grants.insert(
            (grant.session_id.clone(), grant.user_id.clone()),
            grant.clone(),
        );
        Ok(())
    }

    async fn remove_invitee(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.check_persistence()?;
        self.store
            .lock()
            .grants
            .remove(&(session_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn get_invitee(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<ShareGrant>, CollaboratorError> {
        self.check_persistence()?;
        Ok(self.grant(session_id, user_id))
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CollaboratorError> {
        Ok(self.store.lock().users.get(user_id).cloned())
    }

    async fn search_users(
        &self,
        tenant_id: &str,
        prefix: &str,
    ) -> Result<Vec<UserRecord>, CollaboratorError> {
        let mut users: Vec<UserRecord> = self
            .store
            .lock()
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id && u.user_id.starts_with(prefix))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, CollaboratorError> {
        Ok(self.store.lock().tenants.get(tenant_id).cloned())
    }
}

#[async_trait]
impl RouteCache for MemoryBackend {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CollaboratorError> {
        let expires = Instant::now().checked_add(ttl);
        self.store
            .lock()
            .routes
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        let mut store = self.store.lock();
        match store.routes.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                store.routes.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CollaboratorError> {
        self.store.lock().routes.remove(key);
        Ok(())
    }
}

#[async_trait]
impl RecordingQueue for MemoryBackend {
    fn queue_count(&self) -> usize {
        self.store.lock().recordings.len()
    }

    async fn enqueue(&self, job: &RecordingJob) -> Result<(), CollaboratorError> {
        let mut store = self.store.lock();
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % store.recordings.len();
        store.recordings[index].push_back(job.clone());
        Ok(())
    }

    async fn peek(&self, index: usize) -> Result<Option<RecordingJob>, CollaboratorError> {
        let store = self.store.lock();
        let queue = store
            .recordings
            .get(index)
            .ok_or_else(|| CollaboratorError::Queue(format!("no queue {}", index)))?;
        Ok(queue.front().cloned())
    }

    async fn pop(&self, index: usize) -> Result<(), CollaboratorError> {
        let mut store = self.store.lock();
        let queue = store
            .recordings
            .get_mut(index)
            .ok_or_else(|| CollaboratorError::Queue(format!("no queue {}", index)))?;
        queue.pop_front();
        Ok(())
    }
}

impl AuditSink for MemoryBackend {
    fn record(&self, event: AuditEvent) {
        self.store.lock().audit.push(event);
    }
}

#[async_trait]
impl DlpSink for MemoryBackend {
    async fn submit(&self, job: &DlpJob) -> Result<(), CollaboratorError> {
        self.store.lock().dlp.push(job.clone());
        Ok(())
    }
}

#[async_trait]
impl Mailer for MemoryBackend {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<(), CollaboratorError> {
        self.store.lock().invitations.push(invitation.clone());
        Ok(())
    }
}

/// Fixed policy answers, adjustable at runtime
pub struct StaticPolicy {
    decisions: Mutex<HashMap<TransferAction, PolicyDecision>>,
    actions: Mutex<Option<Vec<String>>>,
}

impl StaticPolicy {
    /// Answer `decision` for `action` from now on
    pub fn set_decision(&self, action: TransferAction, decision: PolicyDecision) {
        self.decisions.lock().insert(action, decision);
    }

    /// Actions returned to policy syncs
    pub fn set_actions(&self, actions: Vec<String>) {
        *self.actions.lock() = Some(actions);
    }
}

impl Default for StaticPolicy {
    /// Allows every transfer and pushes no policy
    fn default() -> Self {
        Self {
            decisions: Mutex::new(HashMap::new()),
            actions: Mutex::new(None),
        }
    }
}

#[async_trait]
impl QuotaPolicy for StaticPolicy {
    async fn check(&self, request: &QuotaRequest) -> Result<PolicyDecision, CollaboratorError> {
        Ok(self
            .decisions
            .lock()
            .get(&request.action)
            .copied()
            .unwrap_or(PolicyDecision::Allow))
    }
}

#[async_trait]
impl PolicyFetcher for StaticPolicy {
    async fn fetch_actions(
        &self,
        _app_id: &str,
        _user_id: &str,
    ) -> Result<Option<Vec<String>>, CollaboratorError> {
        Ok(self.actions.lock().clone())
    }
}
