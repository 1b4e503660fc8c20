use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::core::{DatabaseError, Privilege, SessionGrant, SessionId, StatementId};
use crate::parser::PrivilegeRequirement;
use crate::transaction::{
    AccessMode, Behavior, BusyReason, BusyScheduler, Transaction, TransactionMode, WriteLock,
};

/// Engine knobs shared by every session
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Bounded wait inside `WriteLock::acquire`; zero makes it a try-lock
    pub lock_wait: Duration,
    /// Backoff installed after losing the write lock race
    pub busy_retry: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_wait: Duration::ZERO,
            busy_retry: Duration::from_millis(5),
        }
    }
}

/// Flags an administrator flips to interrupt a session (KILL)
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    query: Arc<AtomicBool>,
    connection: Arc<AtomicBool>,
}

impl CancelHandle {
    /// KILL QUERY: abort the running statement only
    pub fn cancel_query(&self) {
        self.query.store(true, Ordering::SeqCst);
    }

    /// KILL CONNECTION: abort the statement and close the session
    pub fn terminate(&self) {
        self.connection.store(true, Ordering::SeqCst);
        self.query.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending query cancellation
    pub fn take_query_cancel(&self) -> bool {
        self.query.swap(false, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.connection.load(Ordering::SeqCst)
    }
}

/// Per-session owner of the native SQLite connection.
///
/// Tracks autocommit, the current [`Transaction`] and the read-only flag.
/// Transaction boundaries are the only place where the write lock is taken
/// or given back.
pub struct ExecutionContext {
    session: SessionId,
    conn: Connection,
    lock: Arc<dyn WriteLock>,
    settings: EngineSettings,
    grant: SessionGrant,
    autocommit: bool,
    read_only: bool,
    transaction: Option<Transaction>,
    /// Characteristics set by SET TRANSACTION for the next transaction
    next_mode: TransactionMode,
    busy: BusyScheduler,
    cancel: CancelHandle,
    next_statement: StatementId,
}

impl ExecutionContext {
    /// Opens the database file for one session. File databases run in WAL mode
    /// so readers never block the single writer.
    pub fn open(
        path: &Path,
        session: SessionId,
        lock: Arc<dyn WriteLock>,
        settings: EngineSettings,
        grant: SessionGrant,
    ) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(session, path = %path.display(), journal_mode = %mode, "connection opened");
        Self::with_connection(conn, session, lock, settings, grant)
    }

    pub fn with_connection(
        conn: Connection,
        session: SessionId,
        lock: Arc<dyn WriteLock>,
        settings: EngineSettings,
        grant: SessionGrant,
    ) -> Result<Self, DatabaseError> {
        // SQLite must never sleep inside a call: contention comes back as SQLITE_BUSY
        conn.busy_timeout(Duration::ZERO)?;
        let read_only = grant.read_only;
        Ok(Self {
            session,
            conn,
            lock,
            settings,
            grant,
            autocommit: true,
            read_only,
            transaction: None,
            next_mode: TransactionMode::default(),
            busy: BusyScheduler::new(),
            cancel: CancelHandle::default(),
            next_statement: 1,
        })
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub const fn grant(&self) -> &SessionGrant {
        &self.grant
    }

    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn next_statement_id(&mut self) -> StatementId {
        let id = self.next_statement;
        self.next_statement += 1;
        id
    }

    #[must_use]
    pub const fn autocommit(&self) -> bool {
        self.autocommit
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    #[must_use]
    pub fn in_implicit_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(Transaction::is_implicit)
    }

    pub const fn busy(&mut self) -> &mut BusyScheduler {
        &mut self.busy
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Fails with `Cancelled` when a KILL arrived since the last check.
    /// Any pending wait of the session is dropped along with the statement.
    pub fn check_cancelled(&mut self) -> Result<(), DatabaseError> {
        if self.cancel.take_query_cancel() {
            warn!(session = self.session, "statement cancelled");
            self.busy.clear();
            return Err(DatabaseError::Cancelled);
        }
        Ok(())
    }

    pub fn check_privilege(&self, requirement: PrivilegeRequirement) -> Result<(), DatabaseError> {
        match requirement {
            PrivilegeRequirement::None => Ok(()),
            _ if self.grant.is_superuser => Ok(()),
            PrivilegeRequirement::Privilege(p) if self.grant.privileges.contains(p) => Ok(()),
            PrivilegeRequirement::Privilege(p) => Err(self.command_denied(p)),
            PrivilegeRequirement::All(required) => match required.iter().find(|p| !self.grant.privileges.contains(**p)) {
                Some(p) => Err(self.command_denied(*p)),
                None => Ok(()),
            },
            PrivilegeRequirement::Superuser => Err(DatabaseError::PermissionDenied(format!(
                "superuser privilege required, user '{}' is not a superuser",
                self.grant.username
            ))),
        }
    }

    fn command_denied(&self, privilege: Privilege) -> DatabaseError {
        DatabaseError::PermissionDenied(format!(
            "{privilege} command denied to user '{}' for database '{}'",
            self.grant.username, self.grant.database
        ))
    }

    /// Rejects writes in a read-only session or read-only transaction
    pub fn check_writable(&self) -> Result<(), DatabaseError> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly("session".to_string()));
        }
        if self.transaction.as_ref().is_some_and(|tx| tx.mode().is_read_only()) {
            return Err(DatabaseError::ReadOnly("transaction".to_string()));
        }
        Ok(())
    }

    fn acquire_write_lock(&mut self) -> Result<(), DatabaseError> {
        if self.lock.acquire(self.session, self.settings.lock_wait) {
            Ok(())
        } else {
            Err(self.busy.contended(BusyReason::LockContended, self.settings.busy_retry))
        }
    }

    fn take_next_mode(&mut self) -> TransactionMode {
        std::mem::take(&mut self.next_mode)
    }

    /// Transaction opened by a statement for its own atomicity. Takes the write
    /// lock first; `native` is false for statements SQLite refuses to run
    /// inside a transaction (VACUUM), which then only hold the lock.
    pub fn begin_implicit(&mut self, statement: StatementId, native: bool) -> Result<(), DatabaseError> {
        if self.transaction.is_some() {
            return Err(DatabaseError::Invariant(format!(
                "statement {statement} opened an implicit transaction inside an open one"
            )));
        }
        self.acquire_write_lock()?;
        if native {
            if let Err(err) = self.conn.execute_batch(Behavior::Immediate.begin_sql()) {
                self.lock.release(self.session)?;
                return Err(err.into());
            }
        }
        let mut tx = Transaction::implicit(TransactionMode::default(), statement);
        tx.native_started = native;
        tx.holds_lock = true;
        self.transaction = Some(tx);
        debug!(session = self.session, statement, "implicit transaction opened");
        Ok(())
    }

    /// Explicit BEGIN. Nothing reaches SQLite until the first statement runs,
    /// so the mode stays adjustable until then.
    pub fn begin_transaction(
        &mut self,
        access: Option<AccessMode>,
        behavior: Option<Behavior>,
    ) -> Result<(), DatabaseError> {
        if self.transaction.is_some() {
            return Err(DatabaseError::AlreadyInTransaction);
        }
        let mode = self.take_next_mode().with(access, behavior);
        self.transaction = Some(Transaction::explicit(mode));
        debug!(session = self.session, ?mode, "transaction begun");
        Ok(())
    }

    /// Prepares the session transaction (if any) for a statement about to run:
    /// opens one when autocommit is off, issues the native BEGIN on first use
    /// and takes the write lock when the statement writes or the mode demands it.
    pub fn activate(&mut self, statement: StatementId, is_write: bool) -> Result<(), DatabaseError> {
        if self.transaction.is_none() {
            if self.autocommit {
                return Ok(());
            }
            let mode = self.take_next_mode();
            self.transaction = Some(Transaction::explicit(mode));
            debug!(session = self.session, ?mode, "transaction opened by autocommit=0");
        }
        if is_write {
            self.check_writable()?;
        }

        let (mode, native_started, holds_lock) = match &self.transaction {
            Some(tx) => (tx.mode(), tx.native_started, tx.holds_lock),
            None => return Ok(()),
        };
        let need_lock = !holds_lock && (is_write || (!native_started && mode.locks_on_start()));
        if need_lock {
            self.acquire_write_lock()?;
        }
        if !native_started {
            if let Err(err) = self.conn.execute_batch(mode.behavior.begin_sql()) {
                if need_lock {
                    self.lock.release(self.session)?;
                }
                return Err(err.into());
            }
        }
        if let Some(tx) = self.transaction.as_mut() {
            tx.native_started = true;
            tx.holds_lock |= need_lock;
            tx.record_statement(statement);
        }
        Ok(())
    }

    fn finish_transaction(&mut self, outcome: &str) -> Result<(), DatabaseError> {
        if let Some(tx) = self.transaction.take() {
            if tx.holds_lock {
                self.lock.release(self.session)?;
            }
            debug!(
                session = self.session,
                implicit = tx.is_implicit(),
                outcome,
                "transaction finished"
            );
        }
        Ok(())
    }

    /// A busy COMMIT leaves the transaction open for a retry; any other failure
    /// rolls it back.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        let native_started = match &self.transaction {
            Some(tx) => tx.native_started,
            None => return Err(DatabaseError::NoActiveTransaction),
        };
        if native_started {
            if let Err(err) = self.conn.execute_batch("COMMIT") {
                let err = DatabaseError::from(err);
                if !err.is_retryable() {
                    self.rollback()?;
                }
                return Err(err);
            }
        }
        self.finish_transaction("committed")
    }

    /// Always ends the transaction and frees the write lock, even when SQLite
    /// already rolled back on its own
    pub fn rollback(&mut self) -> Result<(), DatabaseError> {
        let native_started = match &self.transaction {
            Some(tx) => tx.native_started,
            None => return Err(DatabaseError::NoActiveTransaction),
        };
        let result = if native_started && !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK").map_err(DatabaseError::from)
        } else {
            Ok(())
        };
        self.finish_transaction("rolled back")?;
        result
    }

    /// Rolls back only a transaction some statement opened implicitly
    pub fn rollback_implicit(&mut self) -> Result<(), DatabaseError> {
        if self.in_implicit_transaction() {
            self.rollback()?;
        }
        Ok(())
    }

    /// SAVEPOINT outside a transaction starts one, as SQLite does
    pub fn savepoint(&mut self, statement: StatementId, name: &str) -> Result<(), DatabaseError> {
        if self.transaction.is_none() {
            let mode = self.take_next_mode();
            self.transaction = Some(Transaction::explicit(mode));
        }
        self.activate(statement, false)?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        if let Some(tx) = self.transaction.as_mut() {
            tx.push_savepoint(name);
        }
        Ok(())
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let tx = self.transaction.as_ref().ok_or(DatabaseError::NoActiveTransaction)?;
        if !tx.savepoints().iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return Err(DatabaseError::SavepointNotFound(name.to_string()));
        }
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        match self.transaction.as_mut() {
            Some(tx) => tx.release_savepoint(name),
            None => Ok(()),
        }
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let tx = self.transaction.as_ref().ok_or(DatabaseError::NoActiveTransaction)?;
        if !tx.savepoints().iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return Err(DatabaseError::SavepointNotFound(name.to_string()));
        }
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name)))?;
        match self.transaction.as_mut() {
            Some(tx) => tx.rollback_to_savepoint(name),
            None => Ok(()),
        }
    }

    /// SET TRANSACTION: changes the open transaction while nothing ran in it,
    /// otherwise the next one
    pub fn set_transaction_mode(
        &mut self,
        access: Option<AccessMode>,
        behavior: Option<Behavior>,
    ) -> Result<(), DatabaseError> {
        match self.transaction.as_mut() {
            Some(tx) => {
                let mode = tx.mode().with(access, behavior);
                tx.set_mode(mode)
            }
            None => {
                self.next_mode = self.next_mode.with(access, behavior);
                Ok(())
            }
        }
    }

    /// Turning autocommit back on commits the open transaction
    pub fn set_autocommit(&mut self, on: bool) -> Result<(), DatabaseError> {
        if on && !self.autocommit && self.transaction.is_some() {
            self.commit()?;
        }
        self.autocommit = on;
        Ok(())
    }

    pub fn set_read_only(&mut self, on: bool) -> Result<(), DatabaseError> {
        if self.transaction.is_some() {
            return Err(DatabaseError::TransactionModeLocked);
        }
        self.read_only = on;
        Ok(())
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.busy.clear();
        if self.transaction.is_some() {
            if let Err(err) = self.rollback() {
                warn!(session = self.session, error = %err, "rollback on session close failed");
            }
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
