//! The two directions of a bridged connection

use futures::{Stream, StreamExt};

use rg_core::traits::{tags, AuditEvent, AuditSink};
use rg_core::{Role, TunnelError};
use rg_protocol::{frame_length, opcode, peek_opcode, Instruction, ProtocolError};

use super::connection::Connection;
use super::BridgeError;
use crate::commands::CommandDispatcher;
use crate::room::Grants;
use crate::tunnel::{InstructionReader, InstructionWriter};

/// Where a client frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Written to the backend verbatim
    Forward,
    /// Discarded
    Drop,
    /// Handed to the command dispatcher
    Command,
    /// Keep-alive, echoed to the client
    Ping,
}

/// Route one complete client frame for a participant holding `grants`
pub fn classify(frame: &str, grants: &Grants) -> Route {
    match peek_opcode(frame.as_bytes()) {
        None => Route::Drop,
        Some(opcode::INTERNAL) => match Instruction::parse(frame.as_bytes()) {
            Ok(ins) if ins.arg(0) == Some(opcode::PING) => Route::Ping,
            _ => Route::Drop,
        },
        Some(opcode::COMMAND) => Route::Command,
        Some(opcode::MOUSE) if !grants.mouse => Route::Drop,
        Some(opcode::KEY) if !grants.keyboard => Route::Drop,
        Some(opcode::SIZE) if grants.role != Role::Host => Route::Drop,
        Some(_) => Route::Forward,
    }
}

/// Read client messages until the client goes away.
///
/// A message may hold several instructions. Malformed data drops the rest
/// of its message and the pump carries on.
pub(super) async fn client_to_backend<S>(
    incoming: &mut S,
    writer: &mut InstructionWriter,
    connection: &Connection,
    commands: &CommandDispatcher,
) -> Result<(), BridgeError>
where
    S: Stream<Item = Result<String, BridgeError>> + Unpin,
{
    let client = &connection.client;
    loop {
        let message = tokio::select! {
            _ = client.closed() => return Ok(()),
            message = incoming.next() => message,
        };
        let text = match message {
            Some(Ok(text)) => text,
            Some(Err(BridgeError::ClientClosed)) | None => return Ok(()),
            Some(Err(e)) => return Err(e),
        };

        let mut rest = text.as_str();
        while !rest.is_empty() {
            let len = match frame_length(rest.as_bytes()) {
                Ok(Some(len)) => len,
                Ok(None) => {
                    tracing::debug!("Dropping incomplete client frame ({} bytes)", rest.len());
                    break;
                }
                Err(e) => {
                    tracing::debug!("Dropping malformed client data: {}", e);
                    break;
                }
            };
            let (frame, tail) = rest.split_at(len);
            rest = tail;
            route_frame(frame, writer, connection, commands).await?;
        }
    }
}

async fn route_frame(
    frame: &str,
    writer: &mut InstructionWriter,
    connection: &Connection,
    commands: &CommandDispatcher,
) -> Result<(), BridgeError> {
    match classify(frame, &connection.participant.grants()) {
        Route::Forward => writer.write_raw(frame.as_bytes()).await?,
        Route::Drop => tracing::trace!("Dropped client frame {:?}", peek_opcode(frame.as_bytes())),
        Route::Ping => connection.client.send_text(frame.to_string()).await?,
        Route::Command => match Instruction::parse(frame.as_bytes()) {
            Ok(instruction) => {
                if let Some(response) = commands
                    .dispatch(&instruction, &connection.context, &connection.participant)
                    .await
                {
                    connection.client.send(&response).await?;
                }
            }
            Err(e) => tracing::debug!("Dropping malformed command: {}", e),
        },
    }
    Ok(())
}

/// Forward backend output to the client in batches.
///
/// A batch is flushed once nothing more is buffered from the backend or it
/// reaches `max_batch_size` bytes.
pub(super) async fn backend_to_client(
    reader: &mut InstructionReader,
    connection: &Connection,
    audit: &dyn AuditSink,
    max_batch_size: usize,
) -> Result<(), BridgeError> {
    let client = &connection.client;
    let mut batch = String::with_capacity(max_batch_size);

    loop {
        let frame = tokio::select! {
            _ = client.closed() => return Ok(()),
            frame = reader.read_frame() => frame?,
        };
        let text = std::str::from_utf8(&frame)
            .map_err(|e| TunnelError::Protocol(ProtocolError::InvalidUtf8(e)))?;

        match peek_opcode(&frame) {
            Some(opcode::INTERNAL) => {}
            Some(opcode::SESSION_OPENED) => session_opened(text, connection, audit),
            _ => batch.push_str(text),
        }

        if !batch.is_empty() && (!reader.available() || batch.len() >= max_batch_size) {
            client.send_text(std::mem::take(&mut batch)).await?;
        }
    }
}

fn session_opened(frame: &str, connection: &Connection, audit: &dyn AuditSink) {
    let server_name = match Instruction::parse(frame.as_bytes()) {
        Ok(ins) => ins.arg(0).unwrap_or_default().to_string(),
        Err(e) => {
            tracing::debug!("Malformed session notice: {}", e);
            return;
        }
    };

    if connection.context.mark_authenticated(&server_name) {
        tracing::info!(
            "Session {} opened on {} for {}",
            connection.context.session_id(),
            server_name,
            connection.participant.user_id()
        );
        audit.record(
            AuditEvent::for_session(tags::OPEN, &connection.context)
                .with_user(connection.participant.user_id()),
        );
    }
}
