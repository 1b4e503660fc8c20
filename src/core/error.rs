use rusqlite::ErrorCode;
use thiserror::Error;

use crate::transaction::{BusyReason, BusySignal};

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Retryable: the driver loop must re-invoke the same statement later
    #[error("{0}")]
    Busy(BusySignal),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Broken internal invariant, never an ordinary SQL error
    #[error("Internal error: {0}")]
    Invariant(String),
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("Engine full: {0}")]
    EngineFull(String),
    #[error("Cannot execute statement in a read-only {0}")]
    ReadOnly(String),
    #[error("Transaction characteristics can't be changed while a transaction is in progress")]
    TransactionModeLocked,
    #[error("Transaction already active")]
    AlreadyInTransaction,
    #[error("No active transaction")]
    NoActiveTransaction,
    #[error("Savepoint '{0}' does not exist")]
    SavepointNotFound(String),
    #[error("Query execution was interrupted")]
    Cancelled,
    #[error("Resource temporarily unavailable: gave up after {0} ms of contention")]
    BusyTimeout(u64),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("User '{0}' not found")]
    UserNotFound(String),
    #[error("User '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("Unknown session {0}")]
    SessionNotFound(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DatabaseError {
    /// Only busy conditions may be retried; everything else is terminal for the statement
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    #[must_use]
    pub const fn busy_signal(&self) -> Option<&BusySignal> {
        match self {
            Self::Busy(signal) => Some(signal),
            _ => None,
        }
    }

    /// SQL-state reported to clients
    #[must_use]
    pub const fn sqlstate(&self) -> &'static str {
        match self {
            Self::Busy(_) | Self::BusyTimeout(_) => "HYT00",
            Self::PermissionDenied(_) | Self::AuthenticationFailed => "42000",
            Self::Invariant(_) => "XX000",
            Self::EngineFull(_) => "53100",
            Self::ReadOnly(_) => "25006",
            Self::TransactionModeLocked | Self::AlreadyInTransaction => "25001",
            Self::NoActiveTransaction => "25000",
            Self::SavepointNotFound(_) => "3B001",
            Self::Cancelled => "70100",
            Self::Unsupported(_) => "0A000",
            Self::ParseError(_) => "42601",
            Self::UserNotFound(_) | Self::UserAlreadyExists(_) | Self::SessionNotFound(_) => "HY000",
            Self::Sqlite(_) | Self::Io(_) | Self::Config(_) => "HY000",
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                // A stale WAL snapshot never heals by waiting
                ErrorCode::DatabaseBusy
                    if failure.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT => {}
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Busy(BusySignal::immediate(BusyReason::EngineLocked));
                }
                ErrorCode::DiskFull => return Self::EngineFull(err.to_string()),
                _ => {}
            }
        }
        Self::Sqlite(err)
    }
}
