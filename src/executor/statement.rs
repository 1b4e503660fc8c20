use rusqlite::{Connection, Params};

use super::admin::{KillStatement, ProcessListStatement};
use super::context::ExecutionContext;
use super::native::NativeStatement;
use super::registry::SessionRegistry;
use super::returning::ReturningInsert;
use super::sleep::SleepStatement;
use super::transaction_control::TransactionControl;
use crate::core::{DatabaseError, ResultSet, StatementId, Value};
use crate::parser::{PrivilegeRequirement, StatementDescriptor, StatementKind};

/// What a successful `execute` produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rows are waiting in [`Statement::result_set`]
    ResultSet,
    UpdateCount(u64),
}

/// An executable statement.
///
/// Execution is a resumable state machine: any step may fail with a retryable
/// busy error, in which case the statement keeps its current step and the
/// driver calls `pre_execute`/`execute` again later. A successful run ends with
/// `complete`, which commits or rolls back whatever the statement opened itself.
pub trait Statement: Send {
    fn id(&self) -> StatementId;

    fn descriptor(&self) -> &StatementDescriptor;

    /// Validates the statement against the engine, once
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> Result<(), DatabaseError>;

    /// Admission checks before every execution attempt
    fn pre_execute(&mut self, ctx: &mut ExecutionContext, _max_rows: usize) -> Result<(), DatabaseError> {
        admit(ctx, self.descriptor().required_privilege(), self.descriptor().command.is_write())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Outcome, DatabaseError>;

    /// Takes the rows produced by the last `execute`
    fn result_set(&mut self) -> Result<ResultSet, DatabaseError> {
        Err(DatabaseError::Invariant(format!(
            "statement {} has not produced a result set",
            self.id()
        )))
    }

    fn update_count(&self) -> Option<u64> {
        None
    }

    /// Ends the current execution; `success = false` undoes it
    fn complete(&mut self, ctx: &mut ExecutionContext, success: bool) -> Result<(), DatabaseError>;

    /// Releases whatever an abandoned execution still holds
    fn close(&mut self, ctx: &mut ExecutionContext) {
        if let Err(err) = self.complete(ctx, false) {
            tracing::warn!(statement = self.id(), error = %err, "closing statement failed");
        }
    }
}

/// Privilege gate, read-only check and contention backoff, in that order
pub(crate) fn admit(
    ctx: &mut ExecutionContext,
    requirement: PrivilegeRequirement,
    is_write: bool,
) -> Result<(), DatabaseError> {
    ctx.check_privilege(requirement)?;
    if is_write {
        ctx.check_writable()?;
    }
    ctx.busy().gate()
}

/// Runs a query and collects at most `max_rows` rows (0 = all)
pub(crate) fn query_rows<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    max_rows: usize,
) -> Result<ResultSet, DatabaseError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut result = ResultSet::new(columns);
    let mut rows = stmt.query(params)?;
    while max_rows == 0 || result.rows.len() < max_rows {
        let Some(row) = rows.next()? else { break };
        let values = (0..width)
            .map(|idx| row.get::<_, Value>(idx))
            .collect::<Result<Vec<_>, _>>()?;
        result.rows.push(values);
    }
    Ok(result)
}

/// Turns a descriptor into the statement implementation that handles its kind
pub fn build_statement(
    descriptor: StatementDescriptor,
    ctx: &mut ExecutionContext,
    registry: &SessionRegistry,
) -> Result<Box<dyn Statement>, DatabaseError> {
    let id = ctx.next_statement_id();
    let stmt: Box<dyn Statement> = match &descriptor.kind {
        StatementKind::Native => Box::new(NativeStatement::new(id, descriptor)),
        StatementKind::InsertReturning(spec) => {
            let spec = spec.clone();
            Box::new(ReturningInsert::new(id, descriptor, spec))
        }
        StatementKind::Sleep { seconds } => {
            let seconds = *seconds;
            Box::new(SleepStatement::new(id, descriptor, seconds))
        }
        StatementKind::Begin { .. }
        | StatementKind::Commit
        | StatementKind::Rollback
        | StatementKind::Savepoint(_)
        | StatementKind::Release(_)
        | StatementKind::RollbackTo(_)
        | StatementKind::SetTransaction { .. }
        | StatementKind::SetAutocommit(_)
        | StatementKind::SetReadOnly(_) => Box::new(TransactionControl::new(id, descriptor)),
        StatementKind::ShowProcessList => Box::new(ProcessListStatement::new(id, descriptor, registry.clone())),
        StatementKind::Kill { session, query_only } => {
            let (target, query_only) = (*session, *query_only);
            Box::new(KillStatement::new(id, descriptor, registry.clone(), target, query_only))
        }
        StatementKind::CreateUser { .. } | StatementKind::Grant { .. } | StatementKind::Revoke { .. } => {
            return Err(DatabaseError::Unsupported(format!(
                "{} is handled by the server, not the statement engine",
                descriptor.command
            )));
        }
    };
    Ok(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::tests::memory_context;
    use crate::parser::parse_statement;
    use crate::transaction::LockCoordinator;
    use std::sync::Arc;

    #[test]
    fn test_query_rows_respects_max_rows() {
        let ctx = memory_context(1, Arc::new(LockCoordinator::new()));
        let conn = ctx.connection();
        conn.execute_batch("CREATE TABLE t(v); INSERT INTO t VALUES (1),(2),(3);").unwrap();
        let all = query_rows(conn, "SELECT v FROM t ORDER BY v", [], 0).unwrap();
        assert_eq!(all.len(), 3);
        let two = query_rows(conn, "SELECT v FROM t ORDER BY v", [], 2).unwrap();
        assert_eq!(two.columns, vec!["v".to_string()]);
        assert_eq!(two.rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
    }

    #[test]
    fn test_build_statement_dispatch() {
        let mut ctx = memory_context(1, Arc::new(LockCoordinator::new()));
        let registry = SessionRegistry::new();
        let stmt = build_statement(parse_statement("SELECT 1").unwrap(), &mut ctx, &registry).unwrap();
        assert_eq!(stmt.id(), 1);
        let stmt = build_statement(parse_statement("COMMIT").unwrap(), &mut ctx, &registry).unwrap();
        assert_eq!(stmt.id(), 2);
        assert!(matches!(
            build_statement(parse_statement("CREATE USER a IDENTIFIED BY 'b'").unwrap(), &mut ctx, &registry),
            Err(DatabaseError::Unsupported(_))
        ));
    }

    #[test]
    fn test_result_set_before_execution_is_invariant() {
        let mut ctx = memory_context(1, Arc::new(LockCoordinator::new()));
        let registry = SessionRegistry::new();
        let mut stmt = build_statement(parse_statement("SELECT 1").unwrap(), &mut ctx, &registry).unwrap();
        assert!(matches!(stmt.result_set(), Err(DatabaseError::Invariant(_))));
    }
}
