//! Protocol probe
//!
//! Logs in to a server, sends a list of commands and reports each response.

use anyhow::{Context, Result, bail};
use protocol::{
    CIPHER_SIZE, COLLATION_UTF8_GENERAL, CapabilityFlags, CommandKind, PacketStream,
    packets::{Command, HandshakeResponse41, InitialHandshake, ServerResponse},
};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// A command requested on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    Ping,
    Query(String),
}

impl ProbeCommand {
    fn to_command(&self) -> Command {
        match self {
            ProbeCommand::Ping => Command::new(CommandKind::Ping, ""),
            ProbeCommand::Query(sql) => Command::new(CommandKind::Query, sql.as_str()),
        }
    }
}

impl FromStr for ProbeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ping") {
            return Ok(ProbeCommand::Ping);
        }
        match s.split_once(':') {
            Some((prefix, sql)) if prefix.eq_ignore_ascii_case("query") => {
                Ok(ProbeCommand::Query(sql.to_string()))
            }
            _ => Err(format!("expected 'ping' or 'query:<sql>', got '{s}'")),
        }
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeCommand::Ping => write!(f, "ping"),
            ProbeCommand::Query(sql) => write!(f, "query:{sql}"),
        }
    }
}

/// Client side of one server session
pub struct ProbeClient<S> {
    stream: PacketStream<S>,
    greeting: Option<InitialHandshake>,
}

impl ProbeClient<TcpStream> {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        info!("Connected to {}", addr);
        Ok(Self::new(stream))
    }
}

impl<S> ProbeClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: PacketStream::new(stream),
            greeting: None,
        }
    }

    pub fn greeting(&self) -> Option<&InitialHandshake> {
        self.greeting.as_ref()
    }

    /// Read the server greeting and log in with an empty scramble
    pub async fn login(&mut self, username: &str, database: Option<&str>) -> Result<()> {
        self.stream.reset_sequence();
        let greeting = InitialHandshake::from_bytes(self.stream.read_packet().await?)
            .context("Invalid initial handshake")?;
        info!(
            protocol_version = greeting.protocol_version,
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "Server greeting"
        );
        debug!("Server capabilities: {:?}", greeting.capabilities.names());

        let mut capabilities = CapabilityFlags::PROTOCOL_41 | CapabilityFlags::SECURE_CONNECTION;
        if database.is_some() {
            capabilities |= CapabilityFlags::CONNECT_WITH_DB;
        }
        let response = HandshakeResponse41 {
            capabilities,
            max_packet_size: 0,
            charset: COLLATION_UTF8_GENERAL,
            username: username.to_string(),
            auth_response: vec![0; CIPHER_SIZE],
            schema: database.map(str::to_string),
        };
        self.stream.write_packet(&response.to_bytes()).await?;
        self.greeting = Some(greeting);

        match ServerResponse::from_bytes(self.stream.read_packet().await?)? {
            ServerResponse::Ok(_) => {
                info!("Logged in as {}", username);
                Ok(())
            }
            ServerResponse::Err(err) => bail!(
                "Login rejected: ERROR {} ({}): {}",
                err.code,
                err.state,
                err.message
            ),
            ServerResponse::Eof => bail!("Login rejected: unexpected EOF packet"),
        }
    }

    /// Send one command and read its response
    pub async fn execute(&mut self, command: &ProbeCommand) -> Result<ServerResponse> {
        self.stream.reset_sequence();
        self.stream.write_packet(&command.to_command().to_bytes()).await?;
        let response = ServerResponse::from_bytes(self.stream.read_packet().await?)?;
        debug!(command = %command, "Response: {:?}", response);
        Ok(response)
    }

    /// Send COM_QUIT; the server closes without replying
    pub async fn quit(mut self) -> Result<()> {
        self.stream.reset_sequence();
        self.stream
            .write_packet(&Command::new(CommandKind::Quit, "").to_bytes())
            .await?;
        Ok(())
    }
}

/// Render a response for the terminal
pub fn describe(response: &ServerResponse) -> String {
    match response {
        ServerResponse::Ok(_) => "OK".to_string(),
        ServerResponse::Err(err) => {
            format!("ERROR {} ({}): {}", err.code, err.state, err.message)
        }
        ServerResponse::Eof => "EOF".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{
        SERVER_CAPABILITIES, SqlError,
        packets::{ErrPacket, OkPacket, generate_cipher},
    };
    use tokio::io::{DuplexStream, duplex};

    /// Minimal server: greet, accept, answer every command with 1047 until quit
    async fn fake_server(stream: DuplexStream, accept_login: bool) -> Vec<Command> {
        let mut stream = PacketStream::new(stream);
        let greeting = InitialHandshake::new(7, generate_cipher(), SERVER_CAPABILITIES);
        stream.write_packet(&greeting.to_bytes()).await.unwrap();
        let payload = stream.read_packet().await.unwrap();
        let response = HandshakeResponse41::from_bytes(payload, SERVER_CAPABILITIES).unwrap();
        assert_eq!(response.auth_response.len(), CIPHER_SIZE);

        if !accept_login {
            let err = ErrPacket::from(&SqlError::from_code(1045).unwrap());
            stream.write_packet(&err.to_bytes().unwrap()).await.unwrap();
            return Vec::new();
        }
        stream.write_packet(&OkPacket.to_bytes()).await.unwrap();

        let mut received = Vec::new();
        loop {
            stream.reset_sequence();
            let command = Command::from_bytes(stream.read_packet().await.unwrap()).unwrap();
            if command.kind() == Some(CommandKind::Quit) {
                received.push(command);
                return received;
            }
            received.push(command);
            let err = ErrPacket::from(&SqlError::unknown_command());
            stream.write_packet(&err.to_bytes().unwrap()).await.unwrap();
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("ping".parse::<ProbeCommand>(), Ok(ProbeCommand::Ping));
        assert_eq!(
            "query:SELECT 1".parse::<ProbeCommand>(),
            Ok(ProbeCommand::Query("SELECT 1".to_string()))
        );
        assert_eq!(
            "QUERY:select a:b".parse::<ProbeCommand>(),
            Ok(ProbeCommand::Query("select a:b".to_string()))
        );
        assert!("select 1".parse::<ProbeCommand>().is_err());
        assert!("".parse::<ProbeCommand>().is_err());
    }

    #[test]
    fn test_describe_err() {
        let response = ServerResponse::Err(ErrPacket::from(&SqlError::unknown_command()));
        assert_eq!(describe(&response), "ERROR 1047 (HY000): Unknown command");
        assert_eq!(describe(&ServerResponse::Ok(OkPacket)), "OK");
    }

    #[tokio::test]
    async fn test_probe_session() {
        let (client, server) = duplex(1 << 16);
        let server_task = tokio::spawn(fake_server(server, true));

        let mut probe = ProbeClient::new(client);
        probe.login("root", Some("test")).await.unwrap();
        assert_eq!(probe.greeting().map(|g| g.connection_id), Some(7));

        let response = probe
            .execute(&ProbeCommand::Query("SELECT 1".to_string()))
            .await
            .unwrap();
        assert!(matches!(response, ServerResponse::Err(ErrPacket { code: 1047, .. })));
        probe.execute(&ProbeCommand::Ping).await.unwrap();
        probe.quit().await.unwrap();

        let received = server_task.await.unwrap();
        let kinds: Vec<_> = received.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                Some(CommandKind::Query),
                Some(CommandKind::Ping),
                Some(CommandKind::Quit)
            ]
        );
        assert_eq!(received[0].statement, b"SELECT 1");
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let (client, server) = duplex(1 << 16);
        let server_task = tokio::spawn(fake_server(server, false));

        let mut probe = ProbeClient::new(client);
        let err = probe.login("root", None).await.unwrap_err();
        assert!(err.to_string().contains("1045"));
        server_task.await.unwrap();
    }
}
