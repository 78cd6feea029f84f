//! Session rooms
//!
//! A [`Room`] is one shared remote-desktop session: its creator, the live
//! [`Participant`]s and the invitees allowed to join. Rooms live in the
//! [`RoomRegistry`], which owns every operation that changes membership and
//! runs the close cascade when the last privileged participant is gone.

mod members;
mod participant;
mod registry;

pub use members::{members_instruction, Member};
pub use participant::{Grants, Participant};
pub use registry::RoomRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use rg_core::traits::RecordingJob;
use rg_core::{MemberStatus, Permissions, Role};
use rg_protocol::Instruction;

use crate::bridge::ClientHandle;

/// Route cache key for a session hosted by this gateway
pub fn route_key(session_id: &str) -> String {
    format!("gateway-route-{}", session_id)
}

/// Everything needed to open a room
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub session_id: String,
    pub creator_id: String,
    pub app_id: String,
    pub app_name: String,
    /// Backend connection that joining participants select
    pub backend_connection_id: String,
    pub sharing_allowed: bool,
    /// Recording of the creator's tunnel, enqueued when the room closes
    pub recording: Option<RecordingJob>,
}

#[derive(Debug, Default)]
struct RoomState {
    participants: HashMap<String, Arc<Participant>>,
    invitees: HashMap<String, Permissions>,
    closed: bool,
}

/// What a departure requires once the room lock is released
enum Departure {
    /// No privileged participant remains
    Close,
    /// Push this snapshot to the remaining participants
    Notify(Vec<ClientHandle>, Instruction),
    Unchanged,
}

/// One collaboration session
#[derive(Debug)]
pub struct Room {
    session_id: String,
    creator_id: String,
    app_id: String,
    app_name: String,
    backend_connection_id: String,
    sharing_allowed: bool,
    recording: Option<RecordingJob>,
    created_at: DateTime<Utc>,
    state: Mutex<RoomState>,
}

impl Room {
    fn open(new: NewRoom, creator: Arc<Participant>) -> Self {
        let mut state = RoomState::default();
        state
            .invitees
            .insert(new.creator_id.clone(), Permissions::full());
        state.participants.insert(new.creator_id.clone(), creator);

        Self {
            session_id: new.session_id,
            creator_id: new.creator_id,
            app_id: new.app_id,
            app_name: new.app_name,
            backend_connection_id: new.backend_connection_id,
            sharing_allowed: new.sharing_allowed,
            recording: new.recording,
            created_at: Utc::now(),
            state: Mutex::new(state),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn creator_id(&self) -> &str {
        &self.creator_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn backend_connection_id(&self) -> &str {
        &self.backend_connection_id
    }

    pub fn sharing_allowed(&self) -> bool {
        self.sharing_allowed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn participant(&self, user_id: &str) -> Option<Arc<Participant>> {
        self.state.lock().participants.get(user_id).cloned()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.state.lock().participants.contains_key(user_id)
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.state.lock().participants.keys().cloned().collect()
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants.len()
    }

    /// Stored grant of an invitee
    pub fn invitee(&self, user_id: &str) -> Option<Permissions> {
        self.state.lock().invitees.get(user_id).copied()
    }

    /// Invitees, the creator included
    pub fn invitee_count(&self) -> usize {
        self.state.lock().invitees.len()
    }

    /// Whether a host or co-host is connected
    pub fn has_privileged(&self) -> bool {
        has_privileged(&self.state.lock())
    }

    /// Current membership snapshot
    pub fn members_instruction(&self) -> Instruction {
        members_instruction(&snapshot(&self.state.lock()))
    }
}

fn has_privileged(state: &RoomState) -> bool {
    state
        .participants
        .values()
        .any(|p| p.role().is_privileged())
}

/// Connected participants, then invitees who have not joined
fn snapshot(state: &RoomState) -> Vec<Member> {
    let connected = state.participants.values().map(|p| {
        let grants = p.grants();
        Member {
            user_id: p.user_id().to_string(),
            role: grants.role,
            permission: grants.permissions().to_string(),
            status: MemberStatus::Connected,
        }
    });
    let pending = state
        .invitees
        .iter()
        .filter(|(user_id, _)| !state.participants.contains_key(*user_id))
        .map(|(user_id, permissions)| Member {
            user_id: user_id.clone(),
            role: Role::for_grant(permissions),
            permission: permissions.to_string(),
            status: MemberStatus::Pending,
        });
    connected.chain(pending).collect()
}

fn handles(state: &RoomState) -> Vec<ClientHandle> {
    state
        .participants
        .values()
        .map(|p| p.handle().clone())
        .collect()
}

/// Queue `instruction` to every handle without waiting
fn push_all(handles: &[ClientHandle], instruction: &Instruction) {
    for handle in handles {
        handle.try_send(instruction);
    }
}
