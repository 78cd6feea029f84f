//! Core error types for rdpgate

use rg_protocol::ProtocolError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::Status;

/// Top-level error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Backend tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Room state error
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// External collaborator error
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors on the backend tunnel. All of them end the owning connection.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Dialing the backend failed
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend rejected or broke the handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A read or write did not complete within the socket timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The stream was closed by the peer
    #[error("Tunnel closed")]
    Closed,

    /// Malformed data on the stream
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Room registry errors
#[derive(Error, Debug)]
pub enum RoomError {
    /// No room with this session id
    #[error("Room not found: {0}")]
    NotFound(String),

    /// A room with this session id already exists
    #[error("Room already exists: {0}")]
    AlreadyExists(String),

    /// The user already has a live connection in the room
    #[error("User {0} is already connected")]
    AlreadyJoined(String),

    /// The user holds neither an invitation nor a connection in the room
    #[error("User {0} is not invited")]
    NotInvited(String),

    /// Invitee capacity reached
    #[error("Invitee limit of {limit} reached")]
    InviteeLimit { limit: usize },

    /// The room creator cannot be removed
    #[error("The room creator cannot be removed")]
    CannotRemoveCreator,

    /// The room is closing
    #[error("Room is closing: {0}")]
    Closed(String),
}

impl RoomError {
    /// Side-channel status for this error
    pub fn status(&self) -> Status {
        match self {
            RoomError::NotFound(_) | RoomError::Closed(_) | RoomError::NotInvited(_) => {
                Status::NotFound
            }
            RoomError::CannotRemoveCreator => Status::Forbidden,
            RoomError::AlreadyExists(_)
            | RoomError::AlreadyJoined(_)
            | RoomError::InviteeLimit { .. } => Status::Internal,
        }
    }
}

/// Failures reported by external collaborators
#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// Session/invitee persistence failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Route cache failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Recording queue failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// The oldest job of a queue cannot be decoded
    #[error("Corrupt job: {0}")]
    CorruptJob(String),

    /// Mail delivery failed
    #[error("Mail error: {0}")]
    Mail(String),

    /// Policy source or quota check failed
    #[error("Policy error: {0}")]
    Policy(String),

    /// User directory lookup failed
    #[error("Directory error: {0}")]
    Directory(String),

    /// Collaborator is not reachable
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_error_status() {
        assert_eq!(RoomError::NotFound("s".into()).status(), Status::NotFound);
        assert_eq!(RoomError::CannotRemoveCreator.status(), Status::Forbidden);
        assert_eq!(
            RoomError::InviteeLimit { limit: 4 }.status(),
            Status::Internal
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: GatewayError = RoomError::InviteeLimit { limit: 4 }.into();
        assert_eq!(err.to_string(), "Room error: Invitee limit of 4 reached");

        let err: TunnelError = ProtocolError::Incomplete.into();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }
}
