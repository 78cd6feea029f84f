//! Lifecycle of one bridged connection

use std::sync::Arc;

use futures::Stream;
use metrics::gauge;

use rg_core::traits::{tags, AuditEvent, RecordingJob};
use rg_core::{SessionContext, TunnelError};

use super::pump::{backend_to_client, client_to_backend};
use super::{BridgeError, ClientHandle};
use crate::commands::CommandDispatcher;
use crate::metrics::CONNECTIONS_ACTIVE;
use crate::room::{Participant, RoomRegistry};
use crate::services::Services;
use crate::tunnel::Tunnel;

/// A client admitted to a room, ready to be bridged
#[derive(Debug)]
pub struct Connection {
    pub client: ClientHandle,
    /// Context of this connection; its session id is the room's
    pub context: Arc<SessionContext>,
    pub participant: Arc<Participant>,
    /// Creator of the room the participant is in
    pub room_creator: String,
    /// Recording to enqueue when this connection ends, if it has its own
    pub recording: Option<RecordingJob>,
}

impl Connection {
    fn session_id(&self) -> &str {
        self.context.session_id()
    }

    fn tenant(&self) -> String {
        self.context.tenant_id().to_string()
    }
}

/// Runs the pumps of bridged connections and tears them down
#[derive(Clone)]
pub struct Bridge {
    rooms: Arc<RoomRegistry>,
    commands: Arc<CommandDispatcher>,
    services: Services,
    max_batch_size: usize,
}

impl Bridge {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        commands: Arc<CommandDispatcher>,
        services: Services,
        max_batch_size: usize,
    ) -> Self {
        Self {
            rooms,
            commands,
            services,
            max_batch_size,
        }
    }

    /// Pump between `incoming` and `tunnel` until either side stops.
    ///
    /// Returns the error that ended the connection, if any. Teardown has
    /// run by the time this returns, whichever pump stopped first.
    pub async fn run<S>(
        &self,
        mut connection: Connection,
        mut tunnel: Tunnel,
        mut incoming: S,
    ) -> Result<(), BridgeError>
    where
        S: Stream<Item = Result<String, BridgeError>> + Unpin,
    {
        let halves = (tunnel.acquire_reader(), tunnel.acquire_writer());
        let (Some(mut reader), Some(mut writer)) = halves else {
            connection.client.close();
            self.teardown(&mut connection).await;
            return Err(BridgeError::Tunnel(TunnelError::Closed));
        };

        gauge!(CONNECTIONS_ACTIVE, "tenant" => connection.tenant()).increment(1.0);
        tracing::info!(
            "Bridging {} in session {} (tunnel {})",
            connection.participant.user_id(),
            connection.session_id(),
            tunnel.id()
        );

        let result = {
            let inbound =
                client_to_backend(&mut incoming, &mut writer, &connection, &self.commands);
            let outbound = backend_to_client(
                &mut reader,
                &connection,
                self.services.audit.as_ref(),
                self.max_batch_size,
            );
            tokio::pin!(inbound);
            tokio::pin!(outbound);

            tokio::select! {
                result = &mut inbound => result,
                result = &mut outbound => result,
            }
        };

        connection.client.close();
        writer.shutdown().await;
        drop(reader);
        tunnel.close().await;

        match &result {
            Ok(()) | Err(BridgeError::ClientClosed) => {
                tracing::debug!("Connection of {} closed", connection.participant.user_id())
            }
            Err(e) => tracing::info!(
                "Connection of {} ended: {}",
                connection.participant.user_id(),
                e
            ),
        }

        self.teardown(&mut connection).await;
        gauge!(CONNECTIONS_ACTIVE, "tenant" => connection.tenant()).decrement(1.0);

        match result {
            Err(BridgeError::ClientClosed) => Ok(()),
            other => other,
        }
    }

    async fn teardown(&self, connection: &mut Connection) {
        let session_id = connection.session_id().to_string();
        match self
            .rooms
            .leave_connection(&session_id, &connection.client)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                "{} was no longer in room {}",
                connection.participant.user_id(),
                session_id
            ),
            Err(e) => tracing::debug!("Leaving room {}: {}", session_id, e),
        }

        if connection.participant.user_id() != connection.room_creator {
            self.services.audit.record(
                AuditEvent::for_session(tags::LEAVE, &connection.context)
                    .with_user(connection.participant.user_id()),
            );
        }

        if let Some(job) = connection.recording.take() {
            if let Err(e) = self.services.recordings.enqueue(&job).await {
                tracing::error!("Failed to queue recording {}: {}", job.recording_id, e);
            }
        }
    }
}
