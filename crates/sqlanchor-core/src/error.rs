//! Error types for sqlanchor operations.

use crate::id::Id;
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all sqlanchor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a connection that is not open.
    #[error("database connection is not open")]
    InvalidConnection,

    /// `open` was passed an empty filename.
    #[error("cannot open a database with an empty filename")]
    InvalidFilename,

    /// `open` was called on a connection that is already open.
    #[error("connection is already open against a database file")]
    MultipleConnection,

    /// The engine returned a recognized non-success result code.
    #[error(transparent)]
    Sqlite(#[from] SqliteError),

    /// The engine returned a result code this library does not know.
    #[error("unrecognized SQLite result code {code}: {message}")]
    UnknownSqliteCode { code: i32, message: String },

    /// A prepared statement text contained more than one SQL statement.
    #[error("statement text holds more than one SQL statement")]
    TooManyStatements,

    /// A column was extracted while no result row is available.
    #[error("no result row is available for extraction")]
    NoResultRow,

    /// A column index fell outside the result row.
    #[error("result column index {index} is out of range")]
    IndexOutOfRange { index: i32 },

    /// The value in a result column does not have the requested type.
    #[error("result column {index} does not hold a value of type {expected}")]
    ValueTypeMismatch { index: i32, expected: &'static str },

    /// `step_final` produced a result row.
    #[error("statement yielded a result row where none was expected")]
    UnexpectedResultRow,

    /// A bind referred to a parameter name absent from the statement.
    #[error("statement has no parameter named {name}")]
    NoSuchParameter { name: String },

    /// Transaction nesting depth underflowed or overflowed.
    #[error("{0}")]
    TransactionNesting(String),

    /// Commit or rollback itself failed at the engine level. The
    /// transaction will be rolled back when the session ends, but further
    /// transactions during this session may jeopardize data integrity;
    /// callers should terminate the session.
    #[error(
        "failed to formally resolve a database transaction; further \
         transactions this session may jeopardize data integrity"
    )]
    UnresolvedTransaction,

    /// A lookup by id found no such row in the exclusive table.
    #[error("no record with id {0} exists in the table")]
    BadIdentifier(Id),

    /// The next auto-increment key for a table would overflow `Id`.
    #[error("next primary key for table {table} would overflow")]
    TableSize { table: String },

    /// A bounded counter (handle count or cache-key allocator) saturated.
    #[error("{0}")]
    Overflow(&'static str),

    /// A null handle was dereferenced.
    #[error("handle is not bound to an object")]
    UnboundHandle,

    /// `id()` was called on an object that has no id.
    #[error("object does not have an id")]
    UninitializedId,

    /// A caller violated a precondition of the API.
    #[error("{0}")]
    Logic(String),
}

/// An error reported by the SQLite engine, classified by its primary
/// result code.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct SqliteError {
    pub kind: SqliteErrorKind,
    pub message: String,
}

/// Classification of the engine's primary result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteErrorKind {
    Generic,
    Internal,
    Perm,
    Abort,
    Busy,
    Locked,
    NoMem,
    ReadOnly,
    Interrupt,
    IoErr,
    Corrupt,
    NotFound,
    Full,
    CantOpen,
    Protocol,
    Empty,
    Schema,
    TooBig,
    Constraint,
    Mismatch,
    Misuse,
    NoLfs,
    Auth,
    Format,
    Range,
    NotADb,
}

impl SqliteErrorKind {
    /// Map a primary result code to a kind, or `None` for codes this
    /// library does not recognize.
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            1 => Self::Generic,
            2 => Self::Internal,
            3 => Self::Perm,
            4 => Self::Abort,
            5 => Self::Busy,
            6 => Self::Locked,
            7 => Self::NoMem,
            8 => Self::ReadOnly,
            9 => Self::Interrupt,
            10 => Self::IoErr,
            11 => Self::Corrupt,
            12 => Self::NotFound,
            13 => Self::Full,
            14 => Self::CantOpen,
            15 => Self::Protocol,
            16 => Self::Empty,
            17 => Self::Schema,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            22 => Self::NoLfs,
            23 => Self::Auth,
            24 => Self::Format,
            25 => Self::Range,
            26 => Self::NotADb,
            _ => return None,
        };
        Some(kind)
    }

    /// Human-readable name matching the engine's own terminology.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "SQL logic error",
            Self::Internal => "internal malfunction",
            Self::Perm => "access permission denied",
            Self::Abort => "query aborted",
            Self::Busy => "database is locked",
            Self::Locked => "database table is locked",
            Self::NoMem => "out of memory",
            Self::ReadOnly => "attempt to write a readonly database",
            Self::Interrupt => "interrupted",
            Self::IoErr => "disk I/O error",
            Self::Corrupt => "database disk image is malformed",
            Self::NotFound => "unknown operation",
            Self::Full => "database or disk is full",
            Self::CantOpen => "unable to open database file",
            Self::Protocol => "locking protocol",
            Self::Empty => "empty database",
            Self::Schema => "database schema has changed",
            Self::TooBig => "string or blob too big",
            Self::Constraint => "constraint failed",
            Self::Mismatch => "datatype mismatch",
            Self::Misuse => "bad parameter or other API misuse",
            Self::NoLfs => "large file support is disabled",
            Self::Auth => "authorization denied",
            Self::Format => "file format error",
            Self::Range => "column index out of range",
            Self::NotADb => "file is not a database",
        }
    }
}

impl std::fmt::Display for SqliteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
