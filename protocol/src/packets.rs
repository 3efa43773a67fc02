//! Payload layouts of the connection and command phases
//!
//! Every structure here describes the payload of one logical packet. Framing
//! (length, sequence number, splitting) is handled by [`crate::transport`].

use crate::constants::{
    CIPHER_SIZE, COLLATION_UTF8_GENERAL, CapabilityFlags, CommandKind, EOF_PACKET, ERR_PACKET,
    MAX_FRAME_SIZE, OK_PACKET, PROTOCOL_VERSION, SERVER_VERSION, SQL_STATE_MARKER,
    SQL_STATE_SIZE,
};
use crate::error::{ProtocolError, Result, SqlError};
use std::borrow::Cow;

/// Sequential decoder over a packet payload
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::PacketTooShort {
                field,
                expected: len,
                actual: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16_le(&mut self, field: &'static str) -> Result<u16> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Bytes up to the next NUL, which is consumed but not returned
    pub fn nul_terminated(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MissingTerminator { field })?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Bytes up to the next NUL or the end of the payload
    pub fn nul_or_eof(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos += end + 1;
                &rest[..end]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

/// Generate a fresh authentication challenge.
///
/// Bytes are kept in 1..=127 so clients that treat the scramble as a C string
/// never see an early terminator.
pub fn generate_cipher() -> [u8; CIPHER_SIZE] {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut cipher = [0u8; CIPHER_SIZE];
    for byte in cipher.iter_mut() {
        *byte = rng.gen_range(1..=0x7f);
    }
    cipher
}

/// Initial handshake packet (protocol version 10), server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub cipher: [u8; CIPHER_SIZE],
    pub capabilities: CapabilityFlags,
    pub charset: u8,
}

impl InitialHandshake {
    /// Width of the zero-filled block holding charset, status and upper capabilities
    pub const FLAGS_BLOCK_SIZE: usize = 16;

    pub fn new(connection_id: u32, cipher: [u8; CIPHER_SIZE], capabilities: CapabilityFlags) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            server_version: SERVER_VERSION.to_string(),
            connection_id,
            cipher,
            capabilities,
            charset: COLLATION_UTF8_GENERAL,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.push(self.protocol_version);
        bytes.extend_from_slice(self.server_version.as_bytes());
        bytes.push(0x00);
        bytes.extend_from_slice(&self.connection_id.to_le_bytes());
        bytes.extend_from_slice(&self.cipher[..8]);
        bytes.push(0x00);
        bytes.extend_from_slice(&(self.capabilities.bits() as u16).to_le_bytes());

        // Charset followed by status flags, upper capabilities and reserved bytes,
        // all left zero in this layout.
        let mut block = [0u8; Self::FLAGS_BLOCK_SIZE];
        block[0] = self.charset;
        bytes.extend_from_slice(&block);

        bytes.extend_from_slice(&self.cipher[8..]);
        bytes.push(0x00);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);
        let protocol_version = reader.u8("protocol version")?;
        let server_version =
            String::from_utf8_lossy(reader.nul_terminated("server version")?).into_owned();
        let connection_id = reader.u32_le("connection id")?;

        let mut cipher = [0u8; CIPHER_SIZE];
        cipher[..8].copy_from_slice(reader.take(8, "auth plugin data part 1")?);
        reader.u8("filler")?;

        let lower = reader.u16_le("capability flags")? as u32;
        let block = reader.take(Self::FLAGS_BLOCK_SIZE, "charset and status block")?;
        let upper = u16::from_le_bytes([block[3], block[4]]) as u32;

        cipher[8..].copy_from_slice(reader.take(CIPHER_SIZE - 8, "auth plugin data part 2")?);

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            cipher,
            capabilities: CapabilityFlags::from_bits_truncate(lower | (upper << 16)),
            charset: block[0],
        })
    }
}

/// Handshake response sent by 4.1+ clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse41 {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub schema: Option<String>,
}

impl HandshakeResponse41 {
    pub const RESERVED_SIZE: usize = 23;

    /// Decode a response.
    ///
    /// The encoding of the auth response and the presence of the schema follow the
    /// capabilities the *server* advertised.
    pub fn from_bytes(bytes: &[u8], server_capabilities: CapabilityFlags) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);

        let raw = reader.u32_le("capability flags")?;
        let capabilities = CapabilityFlags::from_bits_truncate(raw);
        if !capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            return Err(ProtocolError::NotProtocol41 { capabilities: raw });
        }

        let max_packet_size = match reader.u32_le("max packet size")? {
            0 => MAX_FRAME_SIZE as u32,
            size => size,
        };
        let charset = reader.u8("character set")?;
        reader.take(Self::RESERVED_SIZE, "reserved")?;

        let username = String::from_utf8_lossy(reader.nul_terminated("username")?).into_owned();

        let auth_response = if server_capabilities
            .contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            return Err(ProtocolError::Unsupported(
                "length-encoded authentication response",
            ));
        } else if server_capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            let len = reader.u8("auth response length")? as usize;
            reader.take(len, "auth response")?.to_vec()
        } else {
            reader.nul_or_eof().to_vec()
        };

        let schema = if server_capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) {
            Some(reader.nul_or_eof())
                .filter(|name| !name.is_empty())
                .map(|name| String::from_utf8_lossy(name).into_owned())
        } else {
            None
        };

        Ok(Self {
            capabilities,
            max_packet_size,
            charset,
            username,
            auth_response,
            schema,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64 + self.username.len() + self.auth_response.len());
        bytes.extend_from_slice(&self.capabilities.bits().to_le_bytes());
        bytes.extend_from_slice(&self.max_packet_size.to_le_bytes());
        bytes.push(self.charset);
        bytes.extend_from_slice(&[0u8; Self::RESERVED_SIZE]);
        bytes.extend_from_slice(self.username.as_bytes());
        bytes.push(0x00);

        if self.capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            bytes.push(self.auth_response.len().min(u8::MAX as usize) as u8);
            bytes.extend_from_slice(&self.auth_response[..self.auth_response.len().min(255)]);
        } else {
            bytes.extend_from_slice(&self.auth_response);
            bytes.push(0x00);
        }

        if let Some(schema) = &self.schema {
            if self.capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) {
                bytes.extend_from_slice(schema.as_bytes());
                bytes.push(0x00);
            }
        }
        bytes
    }
}

/// OK packet. Affected rows, last insert id, status and warnings are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OkPacket;

impl OkPacket {
    pub const SIZE: usize = 7;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [OK_PACKET, 0, 0, 0, 0, 0, 0]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&OK_PACKET) => Ok(Self),
            Some(&marker) => Err(ProtocolError::UnexpectedPacket(marker)),
            None => Err(ProtocolError::PacketTooShort {
                field: "OK marker",
                expected: 1,
                actual: 0,
            }),
        }
    }
}

/// ERR packet (protocol 4.1 layout with SQL state)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub state: String,
    pub message: String,
}

impl From<&SqlError> for ErrPacket {
    fn from(err: &SqlError) -> Self {
        Self {
            code: err.code,
            state: err.state.clone(),
            message: err.message.clone(),
        }
    }
}

impl From<ErrPacket> for SqlError {
    fn from(packet: ErrPacket) -> Self {
        SqlError::new(packet.code, packet.state, packet.message)
    }
}

impl ErrPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.state.len() != SQL_STATE_SIZE {
            return Err(ProtocolError::Encoding(format!(
                "SQL state {:?} is not {} bytes",
                self.state, SQL_STATE_SIZE
            )));
        }

        let mut bytes = Vec::with_capacity(1 + 2 + 1 + SQL_STATE_SIZE + self.message.len());
        bytes.push(ERR_PACKET);
        bytes.extend_from_slice(&self.code.to_le_bytes());
        bytes.push(SQL_STATE_MARKER);
        bytes.extend_from_slice(self.state.as_bytes());
        bytes.extend_from_slice(self.message.as_bytes());
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);
        let marker = reader.u8("ERR marker")?;
        if marker != ERR_PACKET {
            return Err(ProtocolError::UnexpectedPacket(marker));
        }
        let code = reader.u16_le("error code")?;

        let mut state = String::new();
        if bytes.get(3) == Some(&SQL_STATE_MARKER) {
            reader.u8("SQL state marker")?;
            state = String::from_utf8_lossy(reader.take(SQL_STATE_SIZE, "SQL state")?).into_owned();
        }
        let message = String::from_utf8_lossy(reader.rest()).into_owned();

        Ok(Self { code, state, message })
    }
}

/// One decoded command of the command phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: u8,
    pub statement: Vec<u8>,
}

impl Command {
    pub fn new(kind: CommandKind, statement: impl Into<Vec<u8>>) -> Self {
        Self {
            code: kind.code(),
            statement: statement.into(),
        }
    }

    /// Command kind, `None` for codes past the end of the command table
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_u8(self.code)
    }

    pub fn name(&self) -> Option<&'static str> {
        self.kind().map(CommandKind::name)
    }

    /// Statement text for logging
    pub fn statement_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.statement)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);
        let code = reader.u8("command code")?;
        let statement = reader.nul_or_eof().to_vec();
        Ok(Self { code, statement })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.statement.len());
        bytes.push(self.code);
        bytes.extend_from_slice(&self.statement);
        bytes
    }
}

/// A server response classified by its marker byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    Ok(OkPacket),
    Err(ErrPacket),
    Eof,
}

impl ServerResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&OK_PACKET) => Ok(Self::Ok(OkPacket::from_bytes(bytes)?)),
            Some(&ERR_PACKET) => Ok(Self::Err(ErrPacket::from_bytes(bytes)?)),
            Some(&EOF_PACKET) => Ok(Self::Eof),
            Some(&marker) => Err(ProtocolError::UnexpectedPacket(marker)),
            None => Err(ProtocolError::PacketTooShort {
                field: "response marker",
                expected: 1,
                actual: 0,
            }),
        }
    }
}
