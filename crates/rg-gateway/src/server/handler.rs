//! Client connection setup
//!
//! A tunnel request either joins a shared session, reconnects its creator
//! to a room they dropped out of, or opens a new room. Whichever it is, the
//! connection ends up as a room participant with a handshaken backend
//! tunnel, ready for the bridge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use metrics::counter;
use thiserror::Error;

use rg_core::traits::{ActiveSession, RecordingJob};
use rg_core::{
    CollaboratorError, Permissions, RoomError, SessionContext, SessionIdentity, TunnelError,
};
use rg_protocol::{opcode, Instruction, InstructionCodec};

use crate::bridge::{BridgeError, ClientHandle, Connection};
use crate::metrics::CONNECTIONS_TOTAL;
use crate::notify::run_policy_sync;
use crate::room::{route_key, NewRoom, Room};
use crate::state::GatewayState;
use crate::tunnel::{HandshakeConfig, Tunnel};

/// Status codes of the `error` instruction sent when setup fails
mod code {
    pub const SERVER_ERROR: u16 = 0x0200;
    pub const UPSTREAM_TIMEOUT: u16 = 0x0202;
    pub const UPSTREAM_ERROR: u16 = 0x0203;
    pub const RESOURCE_NOT_FOUND: u16 = 0x0204;
    pub const RESOURCE_CONFLICT: u16 = 0x0205;
    pub const CLIENT_BAD_REQUEST: u16 = 0x0300;
    pub const CLIENT_FORBIDDEN: u16 = 0x0303;
}

/// Why a connection could not be admitted
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("{user_id} is not invited to session {session_id}")]
    NotInvited { user_id: String, session_id: String },

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl SetupError {
    pub fn code(&self) -> u16 {
        match self {
            SetupError::MissingParameter(_) | SetupError::InvalidParameter { .. } => {
                code::CLIENT_BAD_REQUEST
            }
            SetupError::NotInvited { .. } => code::CLIENT_FORBIDDEN,
            SetupError::Room(RoomError::NotFound(_) | RoomError::Closed(_)) => {
                code::RESOURCE_NOT_FOUND
            }
            SetupError::Room(RoomError::AlreadyJoined(_) | RoomError::AlreadyExists(_)) => {
                code::RESOURCE_CONFLICT
            }
            SetupError::Room(_) | SetupError::Collaborator(_) => code::SERVER_ERROR,
            SetupError::Tunnel(TunnelError::Timeout(_)) => code::UPSTREAM_TIMEOUT,
            SetupError::Tunnel(_) => code::UPSTREAM_ERROR,
        }
    }

    /// `error,<message>,<code>` for the client
    pub fn instruction(&self) -> Instruction {
        Instruction::new(opcode::ERROR, [self.to_string(), self.code().to_string()])
    }
}

/// Query parameters of a tunnel request
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelParams {
    pub user_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub app_name: String,
    pub protocol: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub dpi: Option<u32>,
    pub share_session_id: Option<String>,
    pub recording: bool,
    pub sharing_allowed: bool,
    pub timezone: Option<String>,
    pub client_ip: Option<String>,
    /// Everything else, offered to the backend as connection arguments
    pub parameters: HashMap<String, String>,
}

fn required(query: &mut HashMap<String, String>, name: &'static str) -> Result<String, SetupError> {
    query
        .remove(name)
        .filter(|v| !v.is_empty())
        .ok_or(SetupError::MissingParameter(name))
}

fn optional(query: &mut HashMap<String, String>, name: &str) -> Option<String> {
    query.remove(name).filter(|v| !v.is_empty())
}

fn number(
    query: &mut HashMap<String, String>,
    name: &'static str,
) -> Result<Option<u32>, SetupError> {
    optional(query, name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| SetupError::InvalidParameter { name, value })
        })
        .transpose()
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl TunnelParams {
    pub fn from_query(mut query: HashMap<String, String>) -> Result<Self, SetupError> {
        let user_id = required(&mut query, "userId")?;
        let tenant_id = required(&mut query, "tenantId")?;
        let app_id = required(&mut query, "appId")?;
        let app_name = optional(&mut query, "appName").unwrap_or_else(|| app_id.clone());

        Ok(Self {
            user_id,
            tenant_id,
            app_id,
            app_name,
            protocol: optional(&mut query, "protocol").unwrap_or_else(|| "rdp".to_string()),
            width: number(&mut query, "width")?,
            height: number(&mut query, "height")?,
            dpi: number(&mut query, "dpi")?,
            share_session_id: optional(&mut query, "shareSessionId"),
            recording: query.remove("recording").is_some_and(|v| flag(&v)),
            sharing_allowed: query.remove("sharing").map_or(true, |v| flag(&v)),
            timezone: optional(&mut query, "timezone"),
            client_ip: optional(&mut query, "clientIp"),
            parameters: query,
        })
    }

    fn identity(&self, session_id: &str) -> SessionIdentity {
        SessionIdentity {
            session_id: session_id.to_string(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            client_ip: self.client_ip.clone(),
            recording: self.recording,
        }
    }

    fn handshake_config(
        &self,
        state: &GatewayState,
        connection_id: Option<String>,
    ) -> HandshakeConfig {
        let defaults = HandshakeConfig::default();
        HandshakeConfig {
            protocol: self.protocol.clone(),
            connection_id,
            parameters: self.parameters.clone(),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            dpi: self.dpi.unwrap_or(defaults.dpi),
            audio_mimetypes: state.config.audio_mimetypes.clone(),
            video_mimetypes: state.config.video_mimetypes.clone(),
            image_mimetypes: state.config.image_mimetypes.clone(),
            timezone: self.timezone.clone(),
        }
    }

    fn recording_job(&self, recording_id: String, session_id: &str) -> Option<RecordingJob> {
        self.recording.then(|| RecordingJob {
            recording_id,
            session_id: session_id.to_string(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            app_name: self.app_name.clone(),
            client_ip: self.client_ip.clone(),
            started_at: Utc::now(),
        })
    }
}

/// Dial the backend and run the handshake
async fn dial(
    state: &GatewayState,
    params: &TunnelParams,
    connection_id: Option<String>,
) -> Result<Tunnel, SetupError> {
    let config = &state.config;
    let mut tunnel = Tunnel::connect(
        &config.backend_address,
        config.socket_timeout,
        InstructionCodec::with_max_size(config.max_instruction_size),
    )
    .await?;

    if let Err(e) = tunnel
        .handshake(&params.handshake_config(state, connection_id))
        .await
    {
        tunnel.close().await;
        return Err(e.into());
    }
    Ok(tunnel)
}

/// Place `client` in a room and open its backend tunnel
pub async fn admit(
    state: &GatewayState,
    params: &TunnelParams,
    client: &ClientHandle,
) -> Result<(Connection, Tunnel), SetupError> {
    if let Some(session_id) = &params.share_session_id {
        return join_shared(state, params, client, session_id).await;
    }
    if let Some(room) = state
        .rooms
        .find_reconnectable(&params.app_id, &params.user_id)
    {
        return rejoin(state, params, client, room).await;
    }
    open_room(state, params, client).await
}

async fn join_shared(
    state: &GatewayState,
    params: &TunnelParams,
    client: &ClientHandle,
    session_id: &str,
) -> Result<(Connection, Tunnel), SetupError> {
    let not_invited = || SetupError::NotInvited {
        user_id: params.user_id.clone(),
        session_id: session_id.to_string(),
    };
    let grant = state
        .services
        .repository
        .get_invitee(session_id, &params.user_id)
        .await?
        .ok_or_else(not_invited)?;
    let room = state
        .rooms
        .get(session_id)
        .ok_or_else(|| RoomError::NotFound(session_id.to_string()))?;
    // The persisted grant alone does not admit; the room must hold a seat
    if room.invitee(&params.user_id).is_none() {
        return Err(not_invited());
    }
    if room.is_connected(&params.user_id) {
        return Err(RoomError::AlreadyJoined(params.user_id.clone()).into());
    }

    let tunnel = dial(state, params, Some(room.backend_connection_id().to_string())).await?;
    let participant = match state.rooms.join_room(
        session_id,
        &params.user_id,
        client.clone(),
        Permissions::parse(&grant.permissions),
    ) {
        Ok(participant) => participant,
        Err(e) => {
            tunnel.close().await;
            return Err(e.into());
        }
    };

    tracing::info!("{} joined shared session {}", params.user_id, session_id);
    let connection = Connection {
        client: client.clone(),
        context: Arc::new(SessionContext::new(params.identity(session_id))),
        participant,
        room_creator: room.creator_id().to_string(),
        recording: params.recording_job(tunnel.id().to_string(), session_id),
    };
    Ok((connection, tunnel))
}

async fn rejoin(
    state: &GatewayState,
    params: &TunnelParams,
    client: &ClientHandle,
    room: Arc<Room>,
) -> Result<(Connection, Tunnel), SetupError> {
    let session_id = room.session_id().to_string();
    let tunnel = dial(state, params, Some(room.backend_connection_id().to_string())).await?;
    let participant =
        match state
            .rooms
            .join_room(&session_id, &params.user_id, client.clone(), Permissions::full())
        {
            Ok(participant) => participant,
            Err(e) => {
                tunnel.close().await;
                return Err(e.into());
            }
        };

    tracing::info!("{} reconnected to session {}", params.user_id, session_id);
    let context = state
        .sessions
        .get(&session_id)
        .unwrap_or_else(|| Arc::new(SessionContext::new(params.identity(&session_id))));
    let connection = Connection {
        client: client.clone(),
        context,
        participant,
        room_creator: room.creator_id().to_string(),
        recording: None,
    };
    Ok((connection, tunnel))
}

async fn open_room(
    state: &GatewayState,
    params: &TunnelParams,
    client: &ClientHandle,
) -> Result<(Connection, Tunnel), SetupError> {
    let tunnel = dial(state, params, None).await?;
    let session_id = tunnel.id().to_string();
    let backend_connection_id = tunnel.connection_id().unwrap_or_default().to_string();
    let context = Arc::new(SessionContext::new(params.identity(&session_id)));
    let config = &state.config;

    let active = ActiveSession {
        session_id: session_id.clone(),
        tenant_id: params.tenant_id.clone(),
        user_id: params.user_id.clone(),
        app_id: params.app_id.clone(),
        app_name: params.app_name.clone(),
        gateway_address: config.advertised_address.clone(),
        started_at: context.started_at(),
    };
    if let Err(e) = state.services.repository.save_active_session(&active).await {
        tracing::warn!("Session {} not persisted: {}", session_id, e);
    }
    if let Err(e) = state
        .services
        .route_cache
        .put(&route_key(&session_id), &config.advertised_address, config.route_ttl)
        .await
    {
        tracing::warn!("Route for session {} not cached: {}", session_id, e);
    }
    state
        .sessions
        .insert_shared(session_id.clone(), Arc::clone(&context));

    let new_room = NewRoom {
        session_id: session_id.clone(),
        creator_id: params.user_id.clone(),
        app_id: params.app_id.clone(),
        app_name: params.app_name.clone(),
        backend_connection_id,
        sharing_allowed: params.sharing_allowed,
        recording: params.recording_job(session_id.clone(), &session_id),
    };
    let participant = match state.rooms.create_room(new_room, client.clone()) {
        Ok(participant) => participant,
        Err(e) => {
            state.sessions.remove(&session_id);
            tunnel.close().await;
            return Err(e.into());
        }
    };

    let connection = Connection {
        client: client.clone(),
        context,
        participant,
        room_creator: params.user_id.clone(),
        recording: None,
    };
    Ok((connection, tunnel))
}

/// Admit `client` and bridge it until it disconnects.
///
/// On a setup failure the client receives an `error` instruction and its
/// transport is closed.
pub async fn serve_connection<S>(
    state: &GatewayState,
    params: TunnelParams,
    client: ClientHandle,
    incoming: S,
) where
    S: Stream<Item = Result<String, BridgeError>> + Unpin,
{
    let (connection, tunnel) = match admit(state, &params, &client).await {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::warn!(
                "Rejected {} for app {}: {}",
                params.user_id,
                params.app_id,
                e
            );
            let _ = client.send(&e.instruction()).await;
            client.close();
            return;
        }
    };

    counter!(CONNECTIONS_TOTAL, "tenant" => params.tenant_id.clone()).increment(1);
    let subscription = state.notifications.subscribe_all(
        &[params.user_id.as_str(), params.app_id.as_str()],
        client.id(),
    );
    tokio::spawn(run_policy_sync(
        subscription,
        client.clone(),
        state.services.policy.clone(),
        params.app_id.clone(),
        params.user_id.clone(),
    ));

    if let Err(e) = state.bridge.run(connection, tunnel, incoming).await {
        tracing::debug!("Bridge for {} stopped: {}", params.user_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_params_from_query() {
        let params = TunnelParams::from_query(query(&[
            ("userId", "user1@x.io"),
            ("tenantId", "t1"),
            ("appId", "app1"),
            ("width", "1920"),
            ("recording", "true"),
            ("hostname", "10.1.2.3"),
        ]))
        .unwrap();

        assert_eq!(params.app_name, "app1");
        assert_eq!(params.protocol, "rdp");
        assert_eq!(params.width, Some(1920));
        assert_eq!(params.height, None);
        assert!(params.recording);
        assert!(params.sharing_allowed);
        assert_eq!(params.parameters.get("hostname").map(String::as_str), Some("10.1.2.3"));
        assert_eq!(params.parameters.len(), 1);
    }

    #[test]
    fn test_params_errors() {
        let missing = TunnelParams::from_query(query(&[("userId", "u"), ("tenantId", "t")]));
        assert!(matches!(missing, Err(SetupError::MissingParameter("appId"))));

        let invalid = TunnelParams::from_query(query(&[
            ("userId", "u"),
            ("tenantId", "t"),
            ("appId", "a"),
            ("dpi", "high"),
        ]));
        assert!(matches!(
            invalid,
            Err(SetupError::InvalidParameter { name: "dpi", .. })
        ));
    }

    #[test]
    fn test_sharing_flag() {
        let params = TunnelParams::from_query(query(&[
            ("userId", "u"),
            ("tenantId", "t"),
            ("appId", "a"),
            ("sharing", "false"),
        ]))
        .unwrap();
        assert!(!params.sharing_allowed);
    }

    #[test]
    fn test_error_instruction() {
        let err = SetupError::NotInvited {
            user_id: "u2".to_string(),
            session_id: "s1".to_string(),
        };
        assert_eq!(err.code(), 771);
        assert_eq!(
            err.instruction().encode(),
            "5.error,31.u2 is not invited to session s1,3.771;"
        );

        let err = SetupError::Tunnel(TunnelError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(err.code(), 514);
        assert_eq!(
            SetupError::Room(RoomError::NotFound("s".into())).code(),
            516
        );
    }
}
