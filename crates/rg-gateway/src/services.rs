//! External collaborators used by the gateway

use std::sync::Arc;

use rg_core::traits::{
    AuditSink, DlpSink, Mailer, PolicyFetcher, QuotaPolicy, RecordingQueue, RouteCache,
    SessionRepository, UserDirectory,
};

use crate::adapters::{MemoryBackend, StaticPolicy};

/// Injected collaborator implementations
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn SessionRepository>,
    pub directory: Arc<dyn UserDirectory>,
    pub route_cache: Arc<dyn RouteCache>,
    pub recordings: Arc<dyn RecordingQueue>,
    pub quota: Arc<dyn QuotaPolicy>,
    pub policy: Arc<dyn PolicyFetcher>,
    pub audit: Arc<dyn AuditSink>,
    pub dlp: Arc<dyn DlpSink>,
    pub mailer: Arc<dyn Mailer>,
}

impl Services {
    /// Every collaborator backed by one fresh in-memory store
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Every collaborator backed by `backend`, with a permissive policy
    pub fn with_backend(backend: Arc<MemoryBackend>) -> Self {
        let policy = Arc::new(StaticPolicy::default());
        Self {
            repository: backend.clone(),
            directory: backend.clone(),
            route_cache: backend.clone(),
            recordings: backend.clone(),
            quota: policy.clone(),
            policy,
            audit: backend.clone(),
            dlp: backend.clone(),
            mailer: backend,
        }
    }
}
