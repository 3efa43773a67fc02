//! sqlgate protocol library
//!
//! Shared definitions of the MySQL client/server protocol subset spoken by the
//! sqlgate server and probe client: constants and flag sets, payload layouts,
//! and sequence-numbered packet framing.

pub mod constants;
pub mod error;
pub mod packets;
pub mod transport;

pub use constants::*;
pub use error::{ProtocolError, SqlError};
pub use transport::PacketStream;
