//! Per-connection protocol session
//!
//! A [`Connection`] owns its stream, sequence counter and packet buffer. It
//! runs the handshake once, then reads, executes and answers commands one at a
//! time until the client quits or the stream fails.

mod handshake;

use crate::handlers::{self, CommandError};
use protocol::{
    CIPHER_SIZE, CapabilityFlags, CommandKind, PacketStream, ProtocolError,
    error::Result,
    packets::{Command, HandshakeResponse41, OkPacket, generate_cipher},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Client connection state
pub struct Connection<S> {
    id: u32,
    cipher: [u8; CIPHER_SIZE],
    stream: PacketStream<S>,
    client: Option<HandshakeResponse41>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u32, stream: S) -> Self {
        Self::with_cipher(id, stream, generate_cipher())
    }

    pub fn with_cipher(id: u32, stream: S, cipher: [u8; CIPHER_SIZE]) -> Self {
        Self {
            id,
            cipher,
            stream: PacketStream::new(stream),
            client: None,
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.client.as_ref().map(|c| c.username.as_str())
    }

    pub fn schema(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.schema.as_deref())
    }

    #[cfg(test)]
    pub fn client_capabilities(&self) -> CapabilityFlags {
        self.client
            .as_ref()
            .map(|c| c.capabilities)
            .unwrap_or_default()
    }

    /// Handshake followed by the command loop
    pub async fn run(&mut self) -> Result<()> {
        self.handle_connection_phase().await?;
        self.handle_command_phase().await
    }

    pub async fn handle_connection_phase(&mut self) -> Result<()> {
        let response = handshake::perform(&mut self.stream, self.id, &self.cipher).await?;
        info!(
            user = %response.username,
            schema = response.schema.as_deref().unwrap_or(""),
            "Handshake successful"
        );
        self.client = Some(response);
        Ok(())
    }

    pub async fn handle_command_phase(&mut self) -> Result<()> {
        self.handle_command_phase_with(handlers::execute).await
    }

    /// Command loop driven by a custom executor
    pub async fn handle_command_phase_with<E>(&mut self, execute: E) -> Result<()>
    where
        E: Fn(&Command) -> std::result::Result<(), CommandError>,
    {
        loop {
            let command = self.read_command().await?;

            if command.kind() == Some(CommandKind::Quit) {
                debug!("Client quit");
                return Ok(());
            }

            match execute(&command) {
                Ok(()) => self.write_ok().await?,
                Err(e) => {
                    warn!(
                        command = command.name().unwrap_or("<undefined>"),
                        "Command failed: {}", e
                    );
                    match self.write_err(&e).await {
                        Ok(()) => {}
                        Err(ProtocolError::Encoding(msg)) => {
                            error!("Cannot report error to client: {}", msg);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Read the next command, starting a new exchange
    async fn read_command(&mut self) -> Result<Command> {
        self.stream.reset_sequence();
        let payload = self.stream.read_packet().await?;
        let command = Command::from_bytes(payload)?;
        debug!(
            code = command.code,
            name = command.name().unwrap_or("<undefined>"),
            statement = %command.statement_lossy(),
            "Received command"
        );
        Ok(command)
    }

    async fn write_ok(&mut self) -> Result<()> {
        self.stream.write_packet(&OkPacket.to_bytes()).await
    }

    async fn write_err(&mut self, err: &CommandError) -> Result<()> {
        let payload = err.to_err_packet()?.to_bytes()?;
        self.stream.write_packet(&payload).await
    }
}
