use super::context::ExecutionContext;
use super::registry::SessionRegistry;
use super::statement::{Outcome, Statement};
use crate::core::{DatabaseError, ResultSet, SessionId, StatementId, Value};
use crate::parser::StatementDescriptor;

/// SHOW [FULL] PROCESSLIST; non-superusers only see their own sessions
pub struct ProcessListStatement {
    id: StatementId,
    descriptor: StatementDescriptor,
    registry: SessionRegistry,
    result: Option<ResultSet>,
}

impl ProcessListStatement {
    pub fn new(id: StatementId, descriptor: StatementDescriptor, registry: SessionRegistry) -> Self {
        Self {
            id,
            descriptor,
            registry,
            result: None,
        }
    }
}

impl Statement for ProcessListStatement {
    fn id(&self) -> StatementId {
        self.id
    }

    fn descriptor(&self) -> &StatementDescriptor {
        &self.descriptor
    }

    fn prepare(&mut self, _ctx: &mut ExecutionContext) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Outcome, DatabaseError> {
        ctx.check_cancelled()?;
        let grant = ctx.grant();
        let mut rs = ResultSet::new(
            ["Id", "User", "db", "Time", "Info"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );
        for info in self.registry.snapshot() {
            if !grant.is_superuser && info.user != grant.username {
                continue;
            }
            if max_rows > 0 && rs.len() >= max_rows {
                break;
            }
            let seconds = i64::try_from(info.connected_at.elapsed().as_secs()).unwrap_or(i64::MAX);
            let command = if info.command.is_empty() { Value::Null } else { Value::Text(info.command) };
            rs.rows.push(vec![
                Value::Integer(i64::try_from(info.id).unwrap_or(i64::MAX)),
                Value::Text(info.user),
                Value::Text(info.database),
                Value::Integer(seconds),
                command,
            ]);
        }
        self.result = Some(rs);
        Ok(Outcome::ResultSet)
    }

    fn result_set(&mut self) -> Result<ResultSet, DatabaseError> {
        self.result
            .take()
            .ok_or_else(|| DatabaseError::Invariant("process list requested before execution".to_string()))
    }

    fn complete(&mut self, _ctx: &mut ExecutionContext, _success: bool) -> Result<(), DatabaseError> {
        self.result = None;
        Ok(())
    }
}

/// KILL [QUERY | CONNECTION] id
pub struct KillStatement {
    id: StatementId,
    descriptor: StatementDescriptor,
    registry: SessionRegistry,
    target: SessionId,
    query_only: bool,
    done: bool,
}

impl KillStatement {
    pub fn new(
        id: StatementId,
        descriptor: StatementDescriptor,
        registry: SessionRegistry,
        target: SessionId,
        query_only: bool,
    ) -> Self {
        Self {
            id,
            descriptor,
            registry,
            target,
            query_only,
            done: false,
        }
    }
}

impl Statement for KillStatement {
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
        let target = self
            .registry
            .get(self.target)
            .ok_or(DatabaseError::SessionNotFound(self.target))?;
        let grant = ctx.grant();
        if !grant.is_superuser && target.user != grant.username {
            return Err(DatabaseError::PermissionDenied(format!(
                "user '{}' is not the owner of session {}",
                grant.username, self.target
            )));
        }
        self.registry.cancel(self.target, self.query_only)?;
        tracing::info!(
            session = ctx.session_id(),
            target = self.target,
            query_only = self.query_only,
            "KILL issued"
        );
        self.done = true;
        Ok(Outcome::UpdateCount(0))
    }

    fn update_count(&self) -> Option<u64> {
        self.done.then_some(0)
    }

    fn complete(&mut self, _ctx: &mut ExecutionContext, _success: bool) -> Result<(), DatabaseError> {
        self.done = false;
        Ok(())
    }
}
