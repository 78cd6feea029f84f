//! Connection handshake with the remote-console daemon

use std::collections::HashMap;

use rg_core::TunnelError;
use rg_protocol::{opcode, Instruction};

use super::io::{InstructionReader, InstructionWriter};

/// Parameters negotiated during the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Remote-desktop protocol, e.g. `rdp`
    pub protocol: String,
    /// Existing backend connection to join instead of opening a new one
    pub connection_id: Option<String>,
    /// Values for the connection arguments the backend asks for
    pub parameters: HashMap<String, String>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub audio_mimetypes: Vec<String>,
    pub video_mimetypes: Vec<String>,
    pub image_mimetypes: Vec<String>,
    pub timezone: Option<String>,
}

impl HandshakeConfig {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    /// What `select` names: the shared connection when joining, else the protocol
    fn selector(&self) -> &str {
        self.connection_id.as_deref().unwrap_or(&self.protocol)
    }

    /// `connect` values in the order the backend listed `names`
    fn connect_values(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|name| {
                if name.starts_with(opcode::VERSION_PREFIX) {
                    name.clone()
                } else {
                    self.parameters.get(name).cloned().unwrap_or_default()
                }
            })
            .collect()
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol: "rdp".to_string(),
            connection_id: None,
            parameters: HashMap::new(),
            width: 1024,
            height: 768,
            dpi: 96,
            audio_mimetypes: Vec::new(),
            video_mimetypes: Vec::new(),
            image_mimetypes: Vec::new(),
            timezone: None,
        }
    }
}

/// Run the handshake and return the backend-assigned connection id
pub(crate) async fn perform(
    reader: &mut InstructionReader,
    writer: &mut InstructionWriter,
    config: &HandshakeConfig,
) -> Result<String, TunnelError> {
    writer
        .write_instruction(&Instruction::new(opcode::SELECT, [config.selector()]))
        .await?;

    let args = reader.expect(opcode::ARGS).await?;

    let size = [
        config.width.to_string(),
        config.height.to_string(),
        config.dpi.to_string(),
    ];
    writer.write_instruction(&Instruction::new(opcode::SIZE, size)).await?;
    writer
        .write_instruction(&Instruction::new(opcode::AUDIO, config.audio_mimetypes.iter().cloned()))
        .await?;
    writer
        .write_instruction(&Instruction::new(opcode::VIDEO, config.video_mimetypes.iter().cloned()))
        .await?;
    writer
        .write_instruction(&Instruction::new(opcode::IMAGE, config.image_mimetypes.iter().cloned()))
        .await?;
    if let Some(timezone) = &config.timezone {
        writer
            .write_instruction(&Instruction::new(opcode::TIMEZONE, [timezone.as_str()]))
            .await?;
    }

    writer
        .write_instruction(&Instruction::new(opcode::CONNECT, config.connect_values(&args.args)))
        .await?;

    let ready = reader.expect(opcode::READY).await?;
    ready
        .arg(0)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TunnelError::Handshake("ready without connection id".to_string()))
}
