//! File transfer commands: DLP hooks, download accounting, quota checks

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use rg_core::traits::{tags, AuditEvent, DlpJob, PolicyDecision, QuotaRequest};
use rg_core::{Status, TransferAction};
use rg_protocol::Instruction;

use super::CommandCall;

/// Shown as the remote path in transfer audit records
const REMOTE_PATH: &str = "Shared drive";

/// File count argument; absent or unparsable counts as one file
fn file_count(arg: Option<&str>) -> u64 {
    arg.and_then(|a| a.trim().parse().ok()).unwrap_or(1)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Transfer path relative to the user's drive directory. `None` when it
/// would step outside of it.
fn relative_path(path: &str) -> Option<&Path> {
    let relative = Path::new(path.trim_start_matches('/'));
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then_some(relative)
}

/// Location of a user's file on the shared drive, when one is configured
fn drive_path(call: &CommandCall<'_>, file: &Path) -> Option<PathBuf> {
    let root = call.config.drive_root.as_ref()?;
    Some(
        root.join(call.context.tenant_id())
            .join(call.context.app_id())
            .join(call.context.user_id())
            .join(file),
    )
}

fn transfer_event(
    call: &CommandCall<'_>,
    tag: impl Into<String>,
    name: &str,
    count: u64,
) -> AuditEvent {
    AuditEvent::for_session(tag, call.context)
        .with_detail("remotePath", REMOTE_PATH)
        .with_detail("files", json!([name]))
        .with_detail("fileCount", count)
}

/// Hand a DLP job to the sink without delaying the response
fn submit_dlp(call: &CommandCall<'_>, job: DlpJob) {
    let dlp = call.services.dlp.clone();
    tokio::spawn(async move {
        if let Err(e) = dlp.submit(&job).await {
            tracing::warn!("DLP job for {} not submitted: {}", job.file_name, e);
        }
    });
}

fn dlp_job(
    call: &CommandCall<'_>,
    direction: TransferAction,
    name: &str,
    path: String,
) -> DlpJob {
    DlpJob {
        tenant_id: call.context.tenant_id().to_string(),
        app_id: call.context.app_id().to_string(),
        session_id: call.session_id().to_string(),
        user_id: call.context.user_id().to_string(),
        direction,
        file_name: name.to_string(),
        file_path: path,
        user_agent: call.participant.user_agent(),
    }
}

/// `dlp-download,<path>`
pub(super) async fn dlp_download(call: &CommandCall<'_>) -> Option<Instruction> {
    let Some(path) = call.arg(0) else {
        return call.status(Status::BadRequest);
    };
    let Some(relative) = relative_path(path) else {
        tracing::warn!("Refusing dlp-download outside the drive: {}", path);
        return call.status(Status::BadRequest);
    };
    let name = file_name(path);
    tracing::debug!("dlp-download {}", path);
    call.services
        .audit
        .record(transfer_event(call, tags::DOWNLOAD, name, 1));

    let full_path = drive_path(call, relative);
    if let Some(full_path) = &full_path {
        if let Ok(metadata) = tokio::fs::metadata(full_path).await {
            if metadata.len() == 0 {
                tracing::info!("Skipping DLP for empty file {}", path);
                return call.respond(json!({ "ok": true }));
            }
        }
    }

    let file_path = full_path
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    submit_dlp(call, dlp_job(call, TransferAction::Download, name, file_path));
    call.respond(json!({ "ok": true }))
}

/// `dlp-upload,<file name>`
pub(super) async fn dlp_upload(call: &CommandCall<'_>) -> Option<Instruction> {
    let Some(name) = call.arg(0) else {
        return call.status(Status::BadRequest);
    };
    let Some(relative) = relative_path(name) else {
        tracing::warn!("Refusing dlp-upload outside the drive: {}", name);
        return call.status(Status::BadRequest);
    };
    tracing::debug!("dlp-upload {}", name);
    call.services
        .audit
        .record(transfer_event(call, tags::UPLOAD, name, 1));

    let file_path = drive_path(call, relative)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    submit_dlp(call, dlp_job(call, TransferAction::Upload, name, file_path));
    call.respond(json!({ "ok": true }))
}

/// `log-download,<count>`: account completed downloads
pub(super) fn log_download(call: &CommandCall<'_>) -> Option<Instruction> {
    let count = file_count(call.arg(0));
    let total = call
        .context
        .increment(TransferAction::Download.as_str(), count);
    tracing::info!(
        "{} downloaded {} file(s) in session {} ({} total)",
        call.context.user_id(),
        count,
        call.session_id(),
        total
    );
    call.services.audit.record(
        AuditEvent::for_session(tags::DOWNLOAD, call.context)
            .with_detail("remotePath", REMOTE_PATH)
            .with_detail("fileCount", count),
    );
    call.respond(json!({ "ok": true, "count": count }))
}

/// `download-check,<count>` / `upload-check,<count>`
pub(super) async fn transfer_check(
    call: &CommandCall<'_>,
    action: TransferAction,
) -> Option<Instruction> {
    let count = file_count(call.arg(0));
    let request = QuotaRequest {
        tenant_id: call.context.tenant_id().to_string(),
        app_id: call.context.app_id().to_string(),
        user_id: call.context.user_id().to_string(),
        action,
        count,
        accumulated: call.context.counter(action.as_str()),
    };

    let decision = match call.services.quota.check(&request).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!("Quota check failed, allowing {}: {}", action, e);
            PolicyDecision::Allow
        }
    };
    tracing::info!("{}-check for {}: {:?}", action, call.context.user_id(), decision);

    if decision == PolicyDecision::Deny {
        let name = file_name(call.arg(0).unwrap_or_default());
        call.services.audit.record(
            transfer_event(call, tags::blocked(action.as_str()), name, 1)
                .with_detail("blockPolicyType", "monitorpolicy")
                .with_detail("blockReason", "Out of quota"),
        );
        return call.respond(json!({ "ok": false }));
    }

    if action == TransferAction::Upload {
        call.context.increment(action.as_str(), count);
    }
    call.respond(json!({ "ok": true, "prompt": decision == PolicyDecision::Prompt }))
}

/// `report-context,<base64 json>`: remember the client's user agent
pub(super) fn report_context(call: &CommandCall<'_>) -> Option<Instruction> {
    let decoded = call
        .arg(0)
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok());

    match decoded {
        Some(user_agent) if user_agent.is_object() => {
            call.participant.set_user_agent(user_agent);
            call.status(Status::Ok)
        }
        _ => call.status(Status::BadRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_count() {
        assert_eq!(file_count(Some("3")), 3);
        assert_eq!(file_count(Some("three")), 1);
        assert_eq!(file_count(None), 1);
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path("/Download/report.xlsx"),
            Some(Path::new("Download/report.xlsx"))
        );
        assert_eq!(relative_path("./notes.txt"), Some(Path::new("./notes.txt")));
        assert_eq!(relative_path("../../../../etc/shadow"), None);
        assert_eq!(relative_path("/Download/../../other-user/secret"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/Download/report.xlsx"), "report.xlsx");
        assert_eq!(file_name("notes.txt"), "notes.txt");
        assert_eq!(file_name("dir/"), "");
    }
}
