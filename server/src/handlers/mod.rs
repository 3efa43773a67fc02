//! Command execution for the command phase
//!
//! Every command kind maps to exactly one outcome here. Only `Quit` is handled
//! (by the session closing the connection); the rest report ER_UNKNOWN_COM_ERROR
//! until a handler is written for them.

use protocol::{
    CommandKind, ProtocolError, SqlError,
    packets::{Command, ErrPacket},
};
use thiserror::Error;
use tracing::debug;

/// Failure of a single command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Build the ERR packet reported to the client.
    ///
    /// Only SQL errors have a wire representation.
    pub fn to_err_packet(&self) -> Result<ErrPacket, ProtocolError> {
        match self {
            CommandError::Sql(err) => Ok(ErrPacket::from(err)),
            CommandError::Internal(msg) => Err(ProtocolError::Encoding(format!(
                "not a SQL error: {msg}"
            ))),
        }
    }
}

impl From<ProtocolError> for CommandError {
    fn from(err: ProtocolError) -> Self {
        CommandError::Internal(err.to_string())
    }
}

/// Execute one command
pub fn execute(command: &Command) -> Result<(), CommandError> {
    use CommandKind as K;

    match command.kind() {
        Some(K::Quit) => Ok(()),
        Some(
            K::Sleep
            | K::InitDb
            | K::Query
            | K::FieldList
            | K::CreateDb
            | K::DropDb
            | K::Refresh
            | K::Shutdown
            | K::Statistics
            | K::ProcessInfo
            | K::Connect
            | K::ProcessKill
            | K::Debug
            | K::Ping
            | K::Time
            | K::DelayedInsert
            | K::ChangeUser
            | K::BinlogDump
            | K::TableDump
            | K::ConnectOut
            | K::RegisterSlave
            | K::StmtPrepare
            | K::StmtExecute
            | K::StmtSendLongData
            | K::StmtClose
            | K::StmtReset
            | K::SetOption
            | K::StmtFetch
            | K::Daemon
            | K::BinlogDumpGtid
            | K::ResetConnection,
        ) => not_implemented(command),
        None => not_implemented(command),
    }
}

fn not_implemented(command: &Command) -> Result<(), CommandError> {
    debug!(
        code = command.code,
        name = command.name().unwrap_or("<undefined>"),
        "Command not implemented"
    );
    Err(SqlError::unknown_command().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::COMMANDS;

    #[test]
    fn test_quit_succeeds() {
        assert!(execute(&Command::new(CommandKind::Quit, "")).is_ok());
    }

    #[test]
    fn test_every_other_command_is_unknown() {
        for kind in COMMANDS.iter().copied().filter(|k| *k != CommandKind::Quit) {
            match execute(&Command::new(kind, "SELECT 1")) {
                Err(CommandError::Sql(err)) => {
                    assert_eq!(err.code, 1047, "{}", kind.name());
                    assert_eq!(err.state, "HY000");
                }
                other => panic!("{}: unexpected {other:?}", kind.name()),
            }
        }
    }

    #[test]
    fn test_out_of_range_code_is_unknown() {
        let command = Command {
            code: 0x99,
            statement: Vec::new(),
        };
        assert!(matches!(execute(&command), Err(CommandError::Sql(err)) if err.code == 1047));
    }

    #[test]
    fn test_internal_error_has_no_err_packet() {
        let err = CommandError::Internal("handler panicked".to_string());
        assert!(matches!(err.to_err_packet(), Err(ProtocolError::Encoding(_))));

        let err = CommandError::from(ProtocolError::Unsupported("prepared statements"));
        assert!(matches!(err, CommandError::Internal(_)));
        assert!(matches!(err.to_err_packet(), Err(ProtocolError::Encoding(_))));

        let err = CommandError::from(SqlError::unknown_command());
        assert_eq!(err.to_err_packet().unwrap().code, 1047);
    }
}
