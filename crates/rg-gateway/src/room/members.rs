//! Membership snapshot pushed to participants

use serde::Serialize;

use rg_core::{MemberStatus, Role};
use rg_protocol::{opcode, Instruction};

/// One entry of a `members` instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub role: Role,
    pub permission: String,
    pub status: MemberStatus,
}

/// `members` instruction carrying `members` as a JSON array
pub fn members_instruction(members: &[Member]) -> Instruction {
    let json = serde_json::to_string(members).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize members: {}", e);
        "[]".to_string()
    });
    Instruction::new(opcode::MEMBERS, [json])
}
