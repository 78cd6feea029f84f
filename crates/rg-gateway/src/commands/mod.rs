//! Side-channel command dispatch
//!
//! Clients send `gw-cmd,<request id>,<op>,<args>...` over the tunnel
//! connection. The bridge hands these to the [`CommandDispatcher`], which
//! looks the op up in a table built at construction and answers with one
//! `gw-resp,<request id>,<json>` instruction (or nothing).

mod sharing;
mod transfer;

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde_json::{json, Value};

use rg_core::config::GatewayConfig;
use rg_core::traits::{tags, AuditEvent};
use rg_core::{SessionContext, Status};
use rg_protocol::{opcode, Instruction};

use crate::metrics::COMMANDS_TOTAL;
use crate::room::{Participant, RoomRegistry};
use crate::services::Services;

/// Every side-channel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ShareSession,
    RemoveShare,
    StopShare,
    SetPermissions,
    SearchUser,
    CheckUser,
    DlpDownload,
    DlpUpload,
    LogDownload,
    DownloadCheck,
    UploadCheck,
    ReportContext,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::ShareSession,
        Command::RemoveShare,
        Command::StopShare,
        Command::SetPermissions,
        Command::SearchUser,
        Command::CheckUser,
        Command::DlpDownload,
        Command::DlpUpload,
        Command::LogDownload,
        Command::DownloadCheck,
        Command::UploadCheck,
        Command::ReportContext,
    ];

    /// Op name on the wire
    pub fn op(&self) -> &'static str {
        match self {
            Command::ShareSession => "share-session",
            Command::RemoveShare => "remove-share",
            Command::StopShare => "stop-share",
            Command::SetPermissions => "set-permissions",
            Command::SearchUser => "search-user",
            Command::CheckUser => "check-user",
            Command::DlpDownload => "dlp-download",
            Command::DlpUpload => "dlp-upload",
            Command::LogDownload => "log-download",
            Command::DownloadCheck => "download-check",
            Command::UploadCheck => "upload-check",
            Command::ReportContext => "report-context",
        }
    }

    async fn execute(&self, call: &CommandCall<'_>) -> Option<Instruction> {
        match self {
            Command::ShareSession => sharing::share_session(call).await,
            Command::RemoveShare => sharing::remove_share(call).await,
            Command::StopShare => sharing::stop_share(call).await,
            Command::SetPermissions => sharing::set_permissions(call).await,
            Command::SearchUser => sharing::search_user(call).await,
            Command::CheckUser => sharing::check_user(call).await,
            Command::DlpDownload => transfer::dlp_download(call).await,
            Command::DlpUpload => transfer::dlp_upload(call).await,
            Command::LogDownload => transfer::log_download(call),
            Command::DownloadCheck => {
                transfer::transfer_check(call, rg_core::TransferAction::Download).await
            }
            Command::UploadCheck => {
                transfer::transfer_check(call, rg_core::TransferAction::Upload).await
            }
            Command::ReportContext => transfer::report_context(call),
        }
    }
}

/// Everything a command handler may touch
pub(crate) struct CommandCall<'a> {
    pub request_id: &'a str,
    /// Arguments after the op
    pub args: &'a [String],
    pub context: &'a SessionContext,
    pub participant: &'a Participant,
    pub rooms: &'a RoomRegistry,
    pub services: &'a Services,
    pub config: &'a GatewayConfig,
}

impl CommandCall<'_> {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }

    pub fn respond(&self, payload: Value) -> Option<Instruction> {
        Some(response(self.request_id, payload))
    }

    pub fn status(&self, status: Status) -> Option<Instruction> {
        self.respond(json!({ "status": status.as_str() }))
    }
}

/// `gw-resp` instruction answering `request_id`
pub fn response(request_id: &str, payload: Value) -> Instruction {
    Instruction::new(opcode::COMMAND_RESPONSE, [request_id.to_string(), payload.to_string()])
}

/// Routes side-channel instructions to their handlers
pub struct CommandDispatcher {
    table: HashMap<&'static str, Command>,
    rooms: Arc<RoomRegistry>,
    services: Services,
    config: Arc<GatewayConfig>,
}

impl CommandDispatcher {
    pub fn new(rooms: Arc<RoomRegistry>, services: Services, config: Arc<GatewayConfig>) -> Self {
        let table = Command::ALL.iter().map(|c| (c.op(), *c)).collect();
        Self {
            table,
            rooms,
            services,
            config,
        }
    }

    pub fn lookup(&self, op: &str) -> Option<Command> {
        self.table.get(op).copied()
    }

    /// Run the command carried by `instruction` for `participant`.
    ///
    /// Returns the response to send back, if any. Unknown ops are audited
    /// and answered with a negative acknowledgement.
    pub async fn dispatch(
        &self,
        instruction: &Instruction,
        context: &SessionContext,
        participant: &Participant,
    ) -> Option<Instruction> {
        let (Some(request_id), Some(op)) = (instruction.arg(0), instruction.arg(1)) else {
            tracing::debug!("Ignoring command without request id and op");
            return None;
        };

        let Some(command) = self.lookup(op) else {
            counter!(COMMANDS_TOTAL, "op" => "unknown").increment(1);
            tracing::warn!(
                "Unhandled command {:?} from {} in session {}",
                op,
                participant.user_id(),
                context.session_id()
            );
            self.services.audit.record(
                AuditEvent::for_session(tags::UNHANDLED_OP, context)
                    .with_user(participant.user_id())
                    .with_detail("op", op),
            );
            return Some(response(request_id, json!({ "ng": 1 })));
        };

        counter!(COMMANDS_TOTAL, "op" => command.op()).increment(1);
        tracing::debug!(
            "Command {} ({}) from {} in session {}",
            command.op(),
            request_id,
            participant.user_id(),
            context.session_id()
        );

        let call = CommandCall {
            request_id,
            args: &instruction.args[2..],
            context,
            participant,
            rooms: &self.rooms,
            services: &self.services,
            config: &self.config,
        };
        command.execute(&call).await
    }
}
