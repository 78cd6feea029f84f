//! rg-core: Core abstractions and configuration for rdpgate
//!
//! Shared domain types, the error taxonomy, configuration, the per-session
//! context store and the interfaces through which the gateway talks to its
//! external collaborators.

pub mod config;
pub mod error;
pub mod session;
pub mod traits;
pub mod types;

pub use error::{CollaboratorError, GatewayError, RoomError, TunnelError};
pub use session::{SessionContext, SessionDataStore, SessionIdentity};
pub use types::{MemberStatus, Permissions, Role, Status, TransferAction};
