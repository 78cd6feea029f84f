//! Session sharing commands

use serde_json::json;

use rg_core::traits::{Invitation, ShareGrant};
use rg_core::{Permissions, Role, Status};
use rg_protocol::Instruction;

use super::CommandCall;

/// Split a `user:permission` argument
fn user_grant(arg: &str) -> Option<(&str, &str)> {
    let mut parts = arg.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(permission), None) if !user.is_empty() => Some((user, permission)),
        _ => None,
    }
}

/// Invitation link, branded with the tenant's IdP domain when it has one
async fn share_url(call: &CommandCall<'_>) -> String {
    let domain = match call
        .services
        .directory
        .get_tenant(call.context.tenant_id())
        .await
    {
        Ok(tenant) => tenant.and_then(|t| t.idp_domain).filter(|d| !d.is_empty()),
        Err(e) => {
            tracing::warn!("Tenant lookup for {} failed: {}", call.context.tenant_id(), e);
            None
        }
    };
    call.config.share_url(call.session_id(), domain.as_deref())
}

/// `share-session,<user:permission>...`
pub(super) async fn share_session(call: &CommandCall<'_>) -> Option<Instruction> {
    let session_id = call.session_id();
    let url = share_url(call).await;

    let Some(room) = call.rooms.get(session_id) else {
        return call.respond(json!({ "status": Status::NotFound.as_str(), "url": url }));
    };
    if !room.sharing_allowed() {
        tracing::warn!("Sharing is disabled for session {}", session_id);
        return call.respond(json!({ "status": Status::Forbidden.as_str(), "url": url }));
    }

    let mut failed = false;
    let mut added = 0;
    for arg in call.args {
        let Some((invitee, permission)) = user_grant(arg) else {
            tracing::warn!("Malformed share entry {:?}", arg);
            continue;
        };

        if let Err(e) = call
            .rooms
            .add_invitee(session_id, invitee, Permissions::parse(permission))
        {
            tracing::warn!("Cannot invite {} to {}: {}", invitee, session_id, e);
            failed = true;
            continue;
        }
        added += 1;

        let grant = ShareGrant {
            session_id: session_id.to_string(),
            user_id: invitee.to_string(),
            tenant_id: call.context.tenant_id().to_string(),
            permissions: permission.to_string(),
        };
        if let Err(e) = call.services.repository.share_session(&grant).await {
            tracing::error!("Failed to persist share of {} with {}: {}", session_id, invitee, e);
            failed = true;
        }

        let mailer = call.services.mailer.clone();
        let invitation = Invitation {
            session_id: session_id.to_string(),
            tenant_id: call.context.tenant_id().to_string(),
            from_user: call.participant.user_id().to_string(),
            to_user: invitee.to_string(),
            app_name: room.app_name().to_string(),
            url: url.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = mailer.send_invitation(&invitation).await {
                tracing::warn!("Invitation to {} not sent: {}", invitation.to_user, e);
            }
        });
    }

    if added > 0 {
        let _ = call.rooms.push_members(session_id);
    }
    let status = if failed { Status::Internal } else { Status::Ok };
    call.respond(json!({ "status": status.as_str(), "url": url }))
}

/// `remove-share,<user>...`
pub(super) async fn remove_share(call: &CommandCall<'_>) -> Option<Instruction> {
    let session_id = call.session_id();
    let Some(room) = call.rooms.get(session_id) else {
        return call.status(Status::Internal);
    };
    if call.args.is_empty() {
        return call.status(Status::Internal);
    }

    let mut failed = false;
    for user_id in call.args {
        if user_id == room.creator_id() || user_id == call.participant.user_id() {
            tracing::warn!(
                "{} cannot remove {} from session {}",
                call.participant.user_id(),
                user_id,
                session_id
            );
            continue;
        }

        if let Err(e) = call.rooms.remove_user(session_id, user_id).await {
            tracing::warn!("Cannot remove {} from {}: {}", user_id, session_id, e);
            failed = true;
        }
        if let Err(e) = call
            .services
            .repository
            .remove_invitee(session_id, user_id)
            .await
        {
            tracing::error!("Failed to persist removal of {} from {}: {}", user_id, session_id, e);
            failed = true;
        }
    }

    let _ = call.rooms.push_members(session_id);
    call.status(if failed { Status::Internal } else { Status::Ok })
}

/// `stop-share`, host only
pub(super) async fn stop_share(call: &CommandCall<'_>) -> Option<Instruction> {
    if call.participant.role() != Role::Host {
        tracing::warn!("{} is not the host, cannot stop sharing", call.participant.user_id());
        return call.status(Status::Unauthorized);
    }

    let session_id = call.session_id();
    match call.rooms.stop_share(session_id).await {
        Ok(revoked) => {
            for user_id in revoked {
                if let Err(e) = call
                    .services
                    .repository
                    .remove_invitee(session_id, &user_id)
                    .await
                {
                    tracing::error!("Failed to persist removal of {}: {}", user_id, e);
                }
            }
            call.status(Status::Ok)
        }
        Err(e) => {
            tracing::warn!("Cannot stop sharing {}: {}", session_id, e);
            call.status(Status::BadRequest)
        }
    }
}

/// `set-permissions,<user:permission>...`, host and co-hosts only
pub(super) async fn set_permissions(call: &CommandCall<'_>) -> Option<Instruction> {
    if call.participant.role() == Role::Viewer {
        tracing::warn!("{} may not set permissions", call.participant.user_id());
        return call.status(Status::Forbidden);
    }

    let session_id = call.session_id();
    let Some(room) = call.rooms.get(session_id) else {
        return call.status(Status::NotFound);
    };

    let mut status = Status::Ok;
    for arg in call.args {
        let Some((user_id, permission)) = user_grant(arg) else {
            tracing::warn!("Malformed permission entry {:?}", arg);
            continue;
        };
        if user_id == room.creator_id() {
            continue;
        }

        // Only invited or connected users; new ones go through share-session
        if let Err(e) = call
            .rooms
            .set_permission(session_id, user_id, Permissions::parse(permission))
            .await
        {
            tracing::warn!("Cannot set permission of {}: {}", user_id, e);
            status = e.status();
            continue;
        }

        let grant = ShareGrant {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            tenant_id: call.context.tenant_id().to_string(),
            permissions: permission.to_string(),
        };
        if let Err(e) = call.services.repository.share_session(&grant).await {
            tracing::error!("Failed to persist permission of {}: {}", user_id, e);
        }
    }

    let _ = call.rooms.push_members(session_id);
    call.status(status)
}

/// `search-user,<prefix>`: users of the caller's tenant
pub(super) async fn search_user(call: &CommandCall<'_>) -> Option<Instruction> {
    let prefix = call.arg(0)?.trim();
    let users = match call
        .services
        .directory
        .search_users(call.context.tenant_id(), prefix)
        .await
    {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!("User search failed: {}", e);
            return None;
        }
    };

    let ids: Vec<String> = users.into_iter().map(|u| u.user_id).collect();
    call.respond(json!({ "users": ids }))
}

/// `check-user,<user>`: whether the user may be invited
pub(super) async fn check_user(call: &CommandCall<'_>) -> Option<Instruction> {
    let Some(target) = call.arg(0) else {
        return call.status(Status::BadRequest);
    };

    let known = match call.services.directory.get_user(target).await {
        Ok(Some(user)) => user.tenant_id == call.context.tenant_id(),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!("User lookup for {} failed: {}", target, e);
            false
        }
    };
    let is_self = target == call.participant.user_id();
    let is_creator = call
        .rooms
        .get(call.session_id())
        .is_some_and(|room| room.creator_id() == target);

    call.status(if known && !is_self && !is_creator {
        Status::Ok
    } else {
        Status::NotFound
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_grant() {
        assert_eq!(user_grant("u2@x.io:mouse,keyboard"), Some(("u2@x.io", "mouse,keyboard")));
        assert_eq!(user_grant("u2@x.io:"), Some(("u2@x.io", "")));
        assert_eq!(user_grant(":admin"), None);
        assert_eq!(user_grant("u2@x.io"), None);
        assert_eq!(user_grant("a:b:c"), None);
    }
}
