//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a participant inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The room creator
    Host,
    /// A participant granted `admin`
    CoHost,
    /// Everyone else
    Viewer,
}

impl Role {
    /// Role for a joining non-creator with the given grant
    pub fn for_grant(permissions: &Permissions) -> Self {
        if permissions.admin {
            Role::CoHost
        } else {
            Role::Viewer
        }
    }

    /// Host and CoHost keep a room alive and may administer it
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Role::Viewer)
    }

    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::CoHost => "cohost",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission grant parsed from a comma-delimited token string.
///
/// Tokens are matched exactly, so `"superadmin"` does not grant `admin`.
/// Unknown tokens are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions {
    pub admin: bool,
    pub mouse: bool,
    pub keyboard: bool,
}

impl Permissions {
    pub const ADMIN: &'static str = "admin";
    pub const MOUSE: &'static str = "mouse";
    pub const KEYBOARD: &'static str = "keyboard";

    /// Every permission
    pub fn full() -> Self {
        Self {
            admin: true,
            mouse: true,
            keyboard: true,
        }
    }

    /// Parse a permission string such as `"mouse,keyboard"`
    pub fn parse(raw: &str) -> Self {
        let mut permissions = Self::default();
        for token in raw.split(',').map(str::trim) {
            match token {
                Self::ADMIN => permissions.admin = true,
                Self::MOUSE => permissions.mouse = true,
                Self::KEYBOARD => permissions.keyboard = true,
                _ => {}
            }
        }
        permissions
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = [
            (self.admin, Self::ADMIN),
            (self.keyboard, Self::KEYBOARD),
            (self.mouse, Self::MOUSE),
        ]
        .into_iter()
        .filter_map(|(granted, token)| granted.then_some(token))
        .collect();
        f.write_str(&tokens.join(","))
    }
}

impl FromStr for Permissions {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Status codes carried in side-channel responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl Status {
    /// Numeric code
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::Internal => 500,
        }
    }

    /// Code as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "200",
            Status::BadRequest => "400",
            Status::Unauthorized => "401",
            Status::Forbidden => "403",
            Status::NotFound => "404",
            Status::Internal => "500",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership state reported in the members snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// Invited but not connected
    Pending,
    /// Live participant
    Connected,
}

impl Serialize for MemberStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match self {
            MemberStatus::Pending => 0,
            MemberStatus::Connected => 1,
        })
    }
}

/// Direction of a file transfer checked against policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Download,
    Upload,
}

impl TransferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferAction::Download => "download",
            TransferAction::Upload => "upload",
        }
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
