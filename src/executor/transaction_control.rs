use super::context::ExecutionContext;
use super::statement::{Outcome, Statement};
use crate::core::{DatabaseError, StatementId};
use crate::parser::{StatementDescriptor, StatementKind};

/// BEGIN, COMMIT, ROLLBACK, savepoints and the session SET statements.
/// None of them produce rows.
pub struct TransactionControl {
    id: StatementId,
    descriptor: StatementDescriptor,
    done: bool,
}

impl TransactionControl {
    pub fn new(id: StatementId, descriptor: StatementDescriptor) -> Self {
        Self {
            id,
            descriptor,
            done: false,
        }
    }

    fn apply(&self, ctx: &mut ExecutionContext) -> Result<(), DatabaseError> {
        match &self.descriptor.kind {
            StatementKind::Begin { access, behavior } => ctx.begin_transaction(*access, *behavior),
            // COMMIT and ROLLBACK outside a transaction are no-ops
            StatementKind::Commit if ctx.in_transaction() => ctx.commit(),
            StatementKind::Rollback if ctx.in_transaction() => ctx.rollback(),
            StatementKind::Commit | StatementKind::Rollback => Ok(()),
            StatementKind::Savepoint(name) => ctx.savepoint(self.id, name),
            StatementKind::Release(name) => ctx.release_savepoint(name),
            StatementKind::RollbackTo(name) => ctx.rollback_to_savepoint(name),
            StatementKind::SetTransaction { access, behavior } => ctx.set_transaction_mode(*access, *behavior),
            StatementKind::SetAutocommit(on) => ctx.set_autocommit(*on),
            StatementKind::SetReadOnly(on) => ctx.set_read_only(*on),
            other => Err(DatabaseError::Invariant(format!(
                "{other:?} is not a transaction control statement"
            ))),
        }
    }
}

impl Statement for TransactionControl {
    fn id(&self) -> StatementId {
        self.id
    }

    fn descriptor(&self) -> &StatementDescriptor {
        &self.descriptor
    }

    fn prepare(&mut self, _ctx: &mut ExecutionContext) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext, _max_rows: usize) -> Result<Outcome, DatabaseError> {
        ctx.check_cancelled()?;
        if self.done {
            return Err(DatabaseError::Invariant(format!(
                "statement {} executed again before completion",
                self.id
            )));
        }
        self.apply(ctx)?;
        self.done = true;
        Ok(Outcome::UpdateCount(0))
    }

    fn update_count(&self) -> Option<u64> {
        self.done.then_some(0)
    }

    fn complete(&mut self, _ctx: &mut ExecutionContext, success: bool) -> Result<(), DatabaseError> {
        let done = std::mem::take(&mut self.done);
        if success && !done {
            return Err(DatabaseError::Invariant(format!(
                "statement {} completed before it ran",
                self.id
            )));
        }
        Ok(())
    }
}
