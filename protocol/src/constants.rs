//! Protocol constants, flag sets and the command table

use bitflags::bitflags;

/// Frame header size: 3-byte length + 1-byte sequence number
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single frame can carry (2^24 - 1)
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

/// Handshake protocol version spoken by the server
pub const PROTOCOL_VERSION: u8 = 0x0a;

/// Version string advertised in the initial handshake
pub const SERVER_VERSION: &str = "0.1.0";

/// Length of the authentication challenge sent to clients
pub const CIPHER_SIZE: usize = 20;

/// Response packet markers
pub const OK_PACKET: u8 = 0x00;
pub const EOF_PACKET: u8 = 0xfe;
pub const ERR_PACKET: u8 = 0xff;

/// SQL-state marker preceding the 5-byte state in ERR packets
pub const SQL_STATE_MARKER: u8 = b'#';

/// SQL-state strings are exactly this long on the wire
pub const SQL_STATE_SIZE: usize = 5;

/// Collation ids
pub const COLLATION_LATIN1_SWEDISH: u8 = 0x08;
pub const COLLATION_UTF8_GENERAL: u8 = 0x21;
pub const COLLATION_BINARY: u8 = 0x3f;

/// Command codes of the command phase.
///
/// New commands are appended at the end so older servers can answer them as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

/// Every defined command, indexed by its code
pub static COMMANDS: [CommandKind; 32] = [
    CommandKind::Sleep,
    CommandKind::Quit,
    CommandKind::InitDb,
    CommandKind::Query,
    CommandKind::FieldList,
    CommandKind::CreateDb,
    CommandKind::DropDb,
    CommandKind::Refresh,
    CommandKind::Shutdown,
    CommandKind::Statistics,
    CommandKind::ProcessInfo,
    CommandKind::Connect,
    CommandKind::ProcessKill,
    CommandKind::Debug,
    CommandKind::Ping,
    CommandKind::Time,
    CommandKind::DelayedInsert,
    CommandKind::ChangeUser,
    CommandKind::BinlogDump,
    CommandKind::TableDump,
    CommandKind::ConnectOut,
    CommandKind::RegisterSlave,
    CommandKind::StmtPrepare,
    CommandKind::StmtExecute,
    CommandKind::StmtSendLongData,
    CommandKind::StmtClose,
    CommandKind::StmtReset,
    CommandKind::SetOption,
    CommandKind::StmtFetch,
    CommandKind::Daemon,
    CommandKind::BinlogDumpGtid,
    CommandKind::ResetConnection,
];

/// Human-readable command names, indexed by command code
pub static COMMAND_NAMES: [&str; 32] = [
    "Sleep",
    "Quit",
    "Init DB",
    "Query",
    "Field List",
    "Create DB",
    "Drop DB",
    "Refresh",
    "Shutdown",
    "Statistics",
    "Processlist",
    "Connect",
    "Kill",
    "Debug",
    "Ping",
    "Time",
    "Delayed insert",
    "Change user",
    "Binlog Dump",
    "Table Dump",
    "Connect Out",
    "Register Slave",
    "Prepare",
    "Execute",
    "Long Data",
    "Close stmt",
    "Reset stmt",
    "Set option",
    "Fetch",
    "Daemon",
    "Binlog Dump GTID",
    "Reset Connection",
];

impl CommandKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        COMMANDS.get(value as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        COMMAND_NAMES[self as usize]
    }
}

bitflags! {
    /// Capability flags negotiated during the handshake
    #[derive(Default)]
    pub struct CapabilityFlags: u32 {
        /// New more secure passwords
        const LONG_PASSWORD = 1 << 0;
        /// Found instead of affected rows
        const FOUND_ROWS = 1 << 1;
        /// Get all column flags
        const LONG_FLAG = 1 << 2;
        /// One can specify db on connect
        const CONNECT_WITH_DB = 1 << 3;
        /// Don't allow database.table.column
        const NO_SCHEMA = 1 << 4;
        /// Can use compression protocol
        const COMPRESS = 1 << 5;
        /// ODBC client
        const ODBC = 1 << 6;
        /// Can use LOAD DATA LOCAL
        const LOCAL_FILES = 1 << 7;
        /// Ignore spaces before '('
        const IGNORE_SPACE = 1 << 8;
        /// New 4.1 protocol
        const PROTOCOL_41 = 1 << 9;
        /// This is an interactive client
        const INTERACTIVE = 1 << 10;
        /// Switch to SSL after handshake
        const SSL = 1 << 11;
        /// Ignore sigpipes
        const IGNORE_SIGPIPE = 1 << 12;
        /// Client knows about transactions
        const TRANSACTIONS = 1 << 13;
        /// Old flag for 4.1 protocol
        const RESERVED = 1 << 14;
        /// New 4.1 authentication
        const SECURE_CONNECTION = 1 << 15;
        /// Enable/disable multi-stmt support
        const MULTI_STATEMENTS = 1 << 16;
        /// Enable/disable multi-results
        const MULTI_RESULTS = 1 << 17;
        /// Multi-results in PS-protocol
        const PS_MULTI_RESULTS = 1 << 18;
        /// Client supports plugin authentication
        const PLUGIN_AUTH = 1 << 19;
        /// Client supports connection attributes
        const CONNECT_ATTRS = 1 << 20;
        /// Authentication response may be longer than 255 bytes
        const PLUGIN_AUTH_LENENC_CLIENT_DATA = 1 << 21;
        /// Don't close the connection for a connection with expired password
        const CAN_HANDLE_EXPIRED_PASSWORDS = 1 << 22;
        const SSL_VERIFY_SERVER_CERT = 1 << 30;
        const REMEMBER_OPTIONS = 1 << 31;
    }
}

/// Capabilities the server advertises. Fixed at build time.
pub const SERVER_CAPABILITIES: CapabilityFlags = CapabilityFlags::from_bits_truncate(
    CapabilityFlags::LONG_PASSWORD.bits
        | CapabilityFlags::FOUND_ROWS.bits
        | CapabilityFlags::CONNECT_WITH_DB.bits
        | CapabilityFlags::LOCAL_FILES.bits
        | CapabilityFlags::PROTOCOL_41.bits
        | CapabilityFlags::INTERACTIVE.bits
        | CapabilityFlags::SECURE_CONNECTION.bits,
);

static CAPABILITY_NAMES: [(CapabilityFlags, &str); 25] = [
    (CapabilityFlags::LONG_PASSWORD, "LONG_PASSWORD"),
    (CapabilityFlags::FOUND_ROWS, "FOUND_ROWS"),
    (CapabilityFlags::LONG_FLAG, "LONG_FLAG"),
    (CapabilityFlags::CONNECT_WITH_DB, "CONNECT_WITH_DB"),
    (CapabilityFlags::NO_SCHEMA, "NO_SCHEMA"),
    (CapabilityFlags::COMPRESS, "COMPRESS"),
    (CapabilityFlags::ODBC, "ODBC"),
    (CapabilityFlags::LOCAL_FILES, "LOCAL_FILES"),
    (CapabilityFlags::IGNORE_SPACE, "IGNORE_SPACE"),
    (CapabilityFlags::PROTOCOL_41, "PROTOCOL_41"),
    (CapabilityFlags::INTERACTIVE, "INTERACTIVE"),
    (CapabilityFlags::SSL, "SSL"),
    (CapabilityFlags::IGNORE_SIGPIPE, "IGNORE_SIGPIPE"),
    (CapabilityFlags::TRANSACTIONS, "TRANSACTIONS"),
    (CapabilityFlags::RESERVED, "RESERVED"),
    (CapabilityFlags::SECURE_CONNECTION, "SECURE_CONNECTION"),
    (CapabilityFlags::MULTI_STATEMENTS, "MULTI_STATEMENTS"),
    (CapabilityFlags::MULTI_RESULTS, "MULTI_RESULTS"),
    (CapabilityFlags::PS_MULTI_RESULTS, "PS_MULTI_RESULTS"),
    (CapabilityFlags::PLUGIN_AUTH, "PLUGIN_AUTH"),
    (CapabilityFlags::CONNECT_ATTRS, "CONNECT_ATTRS"),
    (CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA, "PLUGIN_AUTH_LENENC_CLIENT_DATA"),
    (CapabilityFlags::CAN_HANDLE_EXPIRED_PASSWORDS, "CAN_HANDLE_EXPIRED_PASSWORDS"),
    (CapabilityFlags::SSL_VERIFY_SERVER_CERT, "SSL_VERIFY_SERVER_CERT"),
    (CapabilityFlags::REMEMBER_OPTIONS, "REMEMBER_OPTIONS"),
];

impl CapabilityFlags {
    /// Names of the set flags, lowest bit first
    pub fn names(self) -> Vec<&'static str> {
        CAPABILITY_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

bitflags! {
    /// Server status flags reported in OK and EOF packets
    #[derive(Default)]
    pub struct StatusFlags: u16 {
        const IN_TRANS = 1 << 0;
        /// Server in auto_commit mode
        const AUTOCOMMIT = 1 << 1;
        const UNUSED_1 = 1 << 2;
        /// Multi-query - next query exists
        const MORE_RESULTS_EXISTS = 1 << 3;
        const QUERY_NO_GOOD_INDEX_USED = 1 << 4;
        const QUERY_NO_INDEX_USED = 1 << 5;
        /// A read-only non-scrollable cursor was opened for the query
        const CURSOR_EXISTS = 1 << 6;
        /// A read-only cursor is exhausted
        const LAST_ROW_SENT = 1 << 7;
        /// A database was dropped
        const DB_DROPPED = 1 << 8;
        const NO_BACKSLASH_ESCAPES = 1 << 9;
        /// A reprepared statement returns a different number of columns
        const METADATA_CHANGED = 1 << 10;
        const QUERY_WAS_SLOW = 1 << 11;
        /// Result set contains output parameter values
        const PS_OUT_PARAMS = 1 << 12;
        /// The open transaction is read-only
        const IN_TRANS_READONLY = 1 << 13;

        /// Flags cleared when a new statement starts executing
        const CLEAR_SET = Self::QUERY_NO_GOOD_INDEX_USED.bits
            | Self::QUERY_NO_INDEX_USED.bits
            | Self::MORE_RESULTS_EXISTS.bits
            | Self::METADATA_CHANGED.bits
            | Self::QUERY_WAS_SLOW.bits
            | Self::DB_DROPPED.bits
            | Self::CURSOR_EXISTS.bits
            | Self::LAST_ROW_SENT.bits;
    }
}

bitflags! {
    /// Column definition flags
    #[derive(Default)]
    pub struct FieldFlags: u32 {
        const NOT_NULL = 1 << 0;
        const PRI_KEY = 1 << 1;
        const UNIQUE_KEY = 1 << 2;
        const MULTIPLE_KEY = 1 << 3;
        const BLOB = 1 << 4;
        const UNSIGNED = 1 << 5;
        const ZERO_FILL = 1 << 6;
        const BINARY = 1 << 7;
        const ENUM = 1 << 8;
        const AUTO_INCREMENT = 1 << 9;
        const TIMESTAMP = 1 << 10;
        const SET = 1 << 11;
        const NO_DEFAULT_VALUE = 1 << 12;
        const ON_UPDATE_NOW = 1 << 13;
        const PART_KEY = 1 << 14;
        const NUM = 1 << 15;
        const INTERN_1 = 1 << 16;
        const INTERN_2 = 1 << 17;
        const GET_FIXED_FIELDS = 1 << 18;
        const FIELD_IN_PART_FUNC = 1 << 19;
    }
}

bitflags! {
    /// Sub-commands of COM_REFRESH
    #[derive(Default)]
    pub struct RefreshFlags: u32 {
        const GRANT = 1 << 0;
        const LOG = 1 << 1;
        const TABLES = 1 << 2;
        const HOSTS = 1 << 3;
        const STATUS = 1 << 4;
        const THREADS = 1 << 5;
        const SLAVE = 1 << 6;
        const MASTER = 1 << 7;
        const ERROR_LOG = 1 << 8;
        const ENGINE_LOG = 1 << 9;
        const BINARY_LOG = 1 << 10;
        const RELAY_LOG = 1 << 11;
        const GENERAL_LOG = 1 << 12;
        const SLOW_LOG = 1 << 13;
        const READ_LOCK = 1 << 14;
        const FAST = 1 << 15;
        const QUERY_CACHE = 1 << 16;
        const QUERY_CACHE_FREE = 1 << 17;
        const DES_KEY_FILE = 1 << 18;
        const USER_RESOURCES = 1 << 19;
        const FOR_EXPORT = 1 << 20;
    }
}

/// Column types used in column definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    NewDate = 0x0e,
    Varchar = 0x0f,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl FieldType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Decimal),
            0x01 => Some(Self::Tiny),
            0x02 => Some(Self::Short),
            0x03 => Some(Self::Long),
            0x04 => Some(Self::Float),
            0x05 => Some(Self::Double),
            0x06 => Some(Self::Null),
            0x07 => Some(Self::Timestamp),
            0x08 => Some(Self::LongLong),
            0x09 => Some(Self::Int24),
            0x0a => Some(Self::Date),
            0x0b => Some(Self::Time),
            0x0c => Some(Self::DateTime),
            0x0d => Some(Self::Year),
            0x0e => Some(Self::NewDate),
            0x0f => Some(Self::Varchar),
            0x10 => Some(Self::Bit),
            0x11 => Some(Self::Timestamp2),
            0x12 => Some(Self::DateTime2),
            0x13 => Some(Self::Time2),
            0xf6 => Some(Self::NewDecimal),
            0xf7 => Some(Self::Enum),
            0xf8 => Some(Self::Set),
            0xf9 => Some(Self::TinyBlob),
            0xfa => Some(Self::MediumBlob),
            0xfb => Some(Self::LongBlob),
            0xfc => Some(Self::Blob),
            0xfd => Some(Self::VarString),
            0xfe => Some(Self::String),
            0xff => Some(Self::Geometry),
            _ => None,
        }
    }
}
