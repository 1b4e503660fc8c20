use crate::core::{DatabaseError, StatementId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// SQLite lock escalation strategy of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl Behavior {
    #[must_use]
    pub const fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionMode {
    pub access: AccessMode,
    pub behavior: Behavior,
}

impl TransactionMode {
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            access: AccessMode::ReadOnly,
            behavior: Behavior::Deferred,
        }
    }

    /// Overlays the characteristics a statement actually named
    #[must_use]
    pub fn with(self, access: Option<AccessMode>, behavior: Option<Behavior>) -> Self {
        Self {
            access: access.unwrap_or(self.access),
            behavior: behavior.unwrap_or(self.behavior),
        }
    }

    #[must_use]
    pub fn is_read_only(self) -> bool {
        self.access == AccessMode::ReadOnly
    }

    /// Immediate and exclusive transactions take the write lock as soon as they start
    #[must_use]
    pub fn locks_on_start(self) -> bool {
        self.behavior != Behavior::Deferred
    }
}

/// Per-session transaction record
#[derive(Debug, Clone)]
pub struct Transaction {
    mode: TransactionMode,
    /// Opened by a statement for its own atomicity, invisible to the client
    implicit: bool,
    first_statement: Option<StatementId>,
    savepoints: Vec<String>,
    /// Native BEGIN has been issued on the connection
    pub native_started: bool,
    /// This session owns the write lock for the rest of the transaction
    pub holds_lock: bool,
}

impl Transaction {
    #[must_use]
    pub const fn explicit(mode: TransactionMode) -> Self {
        Self {
            mode,
            implicit: false,
            first_statement: None,
            savepoints: Vec::new(),
            native_started: false,
            holds_lock: false,
        }
    }

    #[must_use]
    pub const fn implicit(mode: TransactionMode, statement: StatementId) -> Self {
        Self {
            mode,
            implicit: true,
            first_statement: Some(statement),
            savepoints: Vec::new(),
            native_started: false,
            holds_lock: false,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> TransactionMode {
        self.mode
    }

    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        self.implicit
    }

    #[must_use]
    pub const fn first_statement(&self) -> Option<StatementId> {
        self.first_statement
    }

    pub fn set_mode(&mut self, mode: TransactionMode) -> Result<(), DatabaseError> {
        if self.first_statement.is_some() {
            return Err(DatabaseError::TransactionModeLocked);
        }
        self.mode = mode;
        Ok(())
    }

    /// Remembers the statement that opened the transaction; later ones are ignored
    pub fn record_statement(&mut self, statement: StatementId) {
        self.first_statement.get_or_insert(statement);
    }

    #[must_use]
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub fn push_savepoint(&mut self, name: &str) {
        self.savepoints.push(name.to_string());
    }

    fn find_savepoint(&self, name: &str) -> Result<usize, DatabaseError> {
        self.savepoints
            .iter()
            .rposition(|s| s.eq_ignore_ascii_case(name))
            .ok_or_else(|| DatabaseError::SavepointNotFound(name.to_string()))
    }

    /// RELEASE drops the savepoint and everything nested inside it
    pub fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let idx = self.find_savepoint(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    /// ROLLBACK TO keeps the savepoint itself, only the nested ones go
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let idx = self.find_savepoint(name)?;
        self.savepoints.truncate(idx + 1);
        Ok(())
    }
}
