use rusqlite::params_from_iter;
use tracing::warn;

use super::context::ExecutionContext;
use super::statement::{admit, query_rows, Outcome, Statement};
use crate::core::{DatabaseError, Privilege, ResultSet, StatementId};
use crate::parser::{PrivilegeRequirement, StatementDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    /// Waiting for the write lock of an implicit transaction
    TxBegin,
    Run,
    /// Ran; waiting for `complete`
    TxEnd,
}

/// Statement SQLite runs as-is, wrapped in an implicit transaction when it
/// writes in autocommit mode
pub struct NativeStatement {
    id: StatementId,
    descriptor: StatementDescriptor,
    prepared: bool,
    is_write: bool,
    is_query: bool,
    requirement: PrivilegeRequirement,
    step: Step,
    opened_implicit: bool,
    result: Option<ResultSet>,
    update_count: Option<u64>,
}

impl NativeStatement {
    pub fn new(id: StatementId, descriptor: StatementDescriptor) -> Self {
        let requirement = descriptor.required_privilege();
        Self {
            id,
            descriptor,
            prepared: false,
            is_write: false,
            is_query: false,
            requirement,
            step: Step::Init,
            opened_implicit: false,
            result: None,
            update_count: None,
        }
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.is_write
    }

    /// Busy errors leave the step untouched for a retry; anything else undoes
    /// the implicit transaction and resets the statement
    fn fail(&mut self, ctx: &mut ExecutionContext, err: DatabaseError) -> DatabaseError {
        if err.is_retryable() {
            return err;
        }
        if std::mem::take(&mut self.opened_implicit) {
            if let Err(rollback_err) = ctx.rollback_implicit() {
                warn!(statement = self.id, error = %rollback_err, "implicit rollback failed");
            }
        }
        self.step = Step::Init;
        err
    }

    fn run(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Outcome, DatabaseError> {
        let conn = ctx.connection();
        let params = params_from_iter(self.descriptor.params.iter());
        if self.is_query {
            self.result = Some(query_rows(conn, &self.descriptor.sql, params, max_rows)?);
            Ok(Outcome::ResultSet)
        } else {
            let changed = conn.prepare_cached(&self.descriptor.sql)?.execute(params)? as u64;
            self.update_count = Some(changed);
            Ok(Outcome::UpdateCount(changed))
        }
    }

    fn advance(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Option<Outcome>, DatabaseError> {
        match self.step {
            Step::Init => {
                self.result = None;
                self.update_count = None;
                if self.is_write && ctx.autocommit() && !ctx.in_transaction() {
                    self.step = Step::TxBegin;
                } else {
                    ctx.activate(self.id, self.is_write)?;
                    self.step = Step::Run;
                }
                Ok(None)
            }
            Step::TxBegin => {
                let native = !self.descriptor.command.forbids_transaction();
                ctx.begin_implicit(self.id, native)?;
                self.opened_implicit = true;
                self.step = Step::Run;
                Ok(None)
            }
            Step::Run => {
                let outcome = self.run(ctx, max_rows)?;
                self.step = Step::TxEnd;
                Ok(Some(outcome))
            }
            Step::TxEnd => Err(DatabaseError::Invariant(format!(
                "statement {} executed again before completion",
                self.id
            ))),
        }
    }
}

impl Statement for NativeStatement {
    fn id(&self) -> StatementId {
        self.id
    }

    fn descriptor(&self) -> &StatementDescriptor {
        &self.descriptor
    }

    fn prepare(&mut self, ctx: &mut ExecutionContext) -> Result<(), DatabaseError> {
        if self.prepared {
            return Ok(());
        }
        let stmt = ctx.connection().prepare_cached(&self.descriptor.sql)?;
        // SQLite knows better than the leading keyword (CTEs, PRAGMA assignments)
        self.is_write = !stmt.readonly() || self.descriptor.command.is_write();
        self.is_query = stmt.column_count() > 0;
        // a write that only looked like a read goes to superusers
        if !stmt.readonly() && self.requirement == PrivilegeRequirement::Privilege(Privilege::Select) {
            warn!(statement = self.id, command = %self.descriptor.command, "write classified as a read");
            self.requirement = PrivilegeRequirement::Superuser;
        }
        self.prepared = true;
        Ok(())
    }

    fn pre_execute(&mut self, ctx: &mut ExecutionContext, _max_rows: usize) -> Result<(), DatabaseError> {
        admit(ctx, self.requirement, self.is_write)
    }

    fn execute(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Outcome, DatabaseError> {
        loop {
            if let Err(err) = ctx.check_cancelled() {
                return Err(self.fail(ctx, err));
            }
            match self.advance(ctx, max_rows) {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(err) => return Err(self.fail(ctx, err)),
            }
        }
    }

    fn result_set(&mut self) -> Result<ResultSet, DatabaseError> {
        self.result.take().ok_or_else(|| {
            DatabaseError::Invariant(format!("statement {} has not produced a result set", self.id))
        })
    }

    fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    fn complete(&mut self, ctx: &mut ExecutionContext, success: bool) -> Result<(), DatabaseError> {
        let step = std::mem::replace(&mut self.step, Step::Init);
        let opened = std::mem::take(&mut self.opened_implicit);
        if success && step != Step::TxEnd {
            if opened {
                ctx.rollback_implicit()?;
            }
            return Err(DatabaseError::Invariant(format!(
                "statement {} completed from step {step:?}",
                self.id
            )));
        }
        if !opened {
            return Ok(());
        }
        if success {
            if let Err(err) = ctx.commit() {
                if err.is_retryable() {
                    self.step = step;
                    self.opened_implicit = true;
                }
                return Err(err);
            }
            Ok(())
        } else {
            ctx.rollback_implicit()
        }
    }
}
