//! Protocol error types

use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("Client does not support protocol 4.1 (capabilities {capabilities:#010x})")]
    NotProtocol41 { capabilities: u32 },

    #[error("Packet too short reading {field}: expected {expected} bytes, got {actual}")]
    PacketTooShort {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Missing NUL terminator reading {field}")]
    MissingTerminator { field: &'static str },

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("Cannot grow packet buffer by {requested} bytes")]
    BufferGrowth { requested: usize },

    #[error("Cannot encode error packet: {0}")]
    Encoding(String),

    #[error("Unexpected packet marker: {0:#04x}")]
    UnexpectedPacket(u8),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Error reported to the client in an ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub code: u16,
    pub state: String,
    pub message: String,
}

/// Error code for commands the server does not implement
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;

/// Known server errors: (code, SQL state, default message)
static SQL_ERRORS: [(u16, &str, &str); 5] = [
    (1040, "08004", "Too many connections"),
    (1045, "28000", "Access denied"),
    (ER_UNKNOWN_COM_ERROR, "HY000", "Unknown command"),
    (1064, "42000", "You have an error in your SQL syntax"),
    (1105, "HY000", "Unknown error"),
];

impl SqlError {
    pub fn new(code: u16, state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            state: state.into(),
            message: message.into(),
        }
    }

    /// Look up a known error by code
    pub fn from_code(code: u16) -> Option<Self> {
        SQL_ERRORS
            .iter()
            .find(|(known, _, _)| *known == code)
            .map(|(code, state, message)| Self::new(*code, *state, *message))
    }

    pub fn unknown_command() -> Self {
        Self::new(ER_UNKNOWN_COM_ERROR, "HY000", "Unknown command")
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.state, self.message)
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_error_lookup() {
        let err = SqlError::from_code(1047).unwrap();
        assert_eq!(err, SqlError::unknown_command());
        assert_eq!(err.state, "HY000");
        assert!(SqlError::from_code(9999).is_none());
    }

    #[test]
    fn test_display() {
        let err = SqlError::unknown_command();
        assert_eq!(err.to_string(), "ERROR 1047 (HY000): Unknown command");
    }
}
