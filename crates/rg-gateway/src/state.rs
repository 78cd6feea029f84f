//! Global gateway state

use std::sync::Arc;

use rg_core::config::GatewayConfig;
use rg_core::{SessionContext, SessionDataStore};

use crate::bridge::Bridge;
use crate::commands::CommandDispatcher;
use crate::notify::NotificationBus;
use crate::room::RoomRegistry;
use crate::services::Services;

/// Shared by every connection of the gateway process
pub struct GatewayState {
    /// Configuration
    pub config: Arc<GatewayConfig>,
    /// Context of every open session, by session id
    pub sessions: Arc<SessionDataStore<SessionContext>>,
    /// Open rooms
    pub rooms: Arc<RoomRegistry>,
    /// Change notifications
    pub notifications: Arc<NotificationBus>,
    /// Side-channel command table
    pub commands: Arc<CommandDispatcher>,
    /// Pumps bridged connections
    pub bridge: Bridge,
    /// External collaborators
    pub services: Services,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, services: Services) -> Self {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionDataStore::new());
        let rooms = Arc::new(RoomRegistry::new(
            config.invitee_limit,
            Arc::clone(&sessions),
            services.clone(),
        ));
        let commands = Arc::new(CommandDispatcher::new(
            Arc::clone(&rooms),
            services.clone(),
            Arc::clone(&config),
        ));
        let bridge = Bridge::new(
            Arc::clone(&rooms),
            Arc::clone(&commands),
            services.clone(),
            config.max_batch_size,
        );

        Self {
            config,
            sessions,
            rooms,
            notifications: Arc::new(NotificationBus::new()),
            commands,
            bridge,
            services,
        }
    }

    /// State with every collaborator in memory
    pub fn in_memory(config: GatewayConfig) -> Self {
        Self::new(config, Services::in_memory())
    }
}
