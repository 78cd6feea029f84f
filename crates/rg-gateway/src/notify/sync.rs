//! Policy sync pushed to a client whenever its policy may have changed

use std::sync::Arc;

use rg_core::traits::PolicyFetcher;
use rg_protocol::{opcode, Instruction};

use super::Subscription;
use crate::bridge::ClientHandle;

/// `sync,policy,<action>...`
pub fn sync_instruction(actions: &[String]) -> Instruction {
    Instruction::new(
        opcode::SYNC,
        std::iter::once("policy".to_string()).chain(actions.iter().cloned()),
    )
}

/// Push the current policy once, then again after every wake-up, until the
/// client goes away.
pub async fn run_policy_sync(
    mut subscription: Subscription,
    client: ClientHandle,
    fetcher: Arc<dyn PolicyFetcher>,
    app_id: String,
    user_id: String,
) {
    push_policy(&client, fetcher.as_ref(), &app_id, &user_id).await;

    loop {
        tokio::select! {
            _ = client.closed() => break,
            signalled = subscription.changed() => {
                if !signalled {
                    break;
                }
                push_policy(&client, fetcher.as_ref(), &app_id, &user_id).await;
            }
        }
    }
    tracing::trace!("Policy sync for {} stopped", user_id);
}

async fn push_policy(
    client: &ClientHandle,
    fetcher: &dyn PolicyFetcher,
    app_id: &str,
    user_id: &str,
) {
    match fetcher.fetch_actions(app_id, user_id).await {
        Ok(Some(actions)) => {
            if client.send(&sync_instruction(&actions)).await.is_err() {
                tracing::debug!("Client of {} gone before policy sync", user_id);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Policy fetch for {} in {} failed: {}", user_id, app_id, e),
    }
}
