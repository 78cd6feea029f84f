//! One live connection inside a room

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use rg_core::{Permissions, Role};

use crate::bridge::ClientHandle;

/// Role and input capabilities of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grants {
    pub role: Role,
    pub mouse: bool,
    pub keyboard: bool,
}

impl Grants {
    /// The room creator
    pub fn host() -> Self {
        Self {
            role: Role::Host,
            mouse: true,
            keyboard: true,
        }
    }

    /// Grants for a non-creator holding `permissions`.
    ///
    /// An admin grant makes a co-host, who controls input like the host.
    pub fn for_grant(permissions: &Permissions) -> Self {
        let role = Role::for_grant(permissions);
        if role.is_privileged() {
            return Self {
                role,
                mouse: true,
                keyboard: true,
            };
        }
        Self {
            role,
            mouse: permissions.mouse,
            keyboard: permissions.keyboard,
        }
    }

    /// Permission set shown to clients
    pub fn permissions(&self) -> Permissions {
        if self.role.is_privileged() {
            return Permissions::full();
        }
        Permissions {
            admin: false,
            mouse: self.mouse,
            keyboard: self.keyboard,
        }
    }
}

/// A connected user in a [`Room`](super::Room)
#[derive(Debug)]
pub struct Participant {
    user_id: String,
    handle: ClientHandle,
    grants: RwLock<Grants>,
    user_agent: Mutex<Option<Value>>,
    joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, handle: ClientHandle, grants: Grants) -> Self {
        Self {
            user_id: user_id.into(),
            handle,
            grants: RwLock::new(grants),
            user_agent: Mutex::new(None),
            joined_at: Utc::now(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Outbound transport of this participant
    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub fn grants(&self) -> Grants {
        *self.grants.read()
    }

    pub fn role(&self) -> Role {
        self.grants.read().role
    }

    pub(crate) fn set_grants(&self, grants: Grants) {
        *self.grants.write() = grants;
    }

    /// Client context reported by the browser
    pub fn user_agent(&self) -> Option<Value> {
        self.user_agent.lock().clone()
    }

    pub fn set_user_agent(&self, user_agent: Value) {
        *self.user_agent.lock() = Some(user_agent);
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Whether this entry belongs to the transport behind `handle`
    pub fn is_connection(&self, handle: &ClientHandle) -> bool {
        self.handle.same_connection(handle)
    }
}
