use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::{DatabaseError, ResultSet, SessionId};
use crate::executor::{build_statement, ExecutionContext, Outcome, SessionRegistry, Statement};
use crate::parser::{parse_statement, StatementDescriptor};
use crate::transaction::{BusyReason, BusySignal};

/// Driver loop limits
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Give up on a statement after this much lock or engine contention
    pub busy_timeout: Duration,
    /// Longest single sleep between retries, so KILL is noticed promptly
    pub poll_interval: Duration,
    /// Row cap per result set (0 = unlimited)
    pub max_rows: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            max_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows(ResultSet),
    Updated(u64),
}

/// One logged-in client. Drives statements to completion, sleeping on the
/// tokio timer whenever a statement reports busy.
pub struct Session {
    ctx: ExecutionContext,
    registry: SessionRegistry,
    settings: SessionSettings,
}

impl Session {
    /// Registers the session so it shows up in SHOW PROCESSLIST
    pub fn new(ctx: ExecutionContext, registry: SessionRegistry, settings: SessionSettings) -> Self {
        let grant = ctx.grant();
        registry.register(ctx.session_id(), &grant.username, &grant.database, ctx.cancel_handle());
        Self { ctx, registry, settings }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.ctx.session_id()
    }

    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub const fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.ctx
    }

    /// Set by KILL CONNECTION
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.ctx.cancel_handle().is_terminated()
    }

    pub async fn execute_sql(&mut self, sql: &str) -> Result<StatementResult, DatabaseError> {
        let descriptor = parse_statement(sql)?;
        self.execute(descriptor).await
    }

    pub async fn execute(&mut self, descriptor: StatementDescriptor) -> Result<StatementResult, DatabaseError> {
        let id = self.ctx.session_id();
        self.registry.set_command(id, &descriptor.sql);
        let mut stmt = build_statement(descriptor, &mut self.ctx, &self.registry)?;
        let result = drive(stmt.as_mut(), &mut self.ctx, self.settings).await;
        if result.is_err() {
            stmt.close(&mut self.ctx);
        }
        self.registry.set_command(id, "");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.unregister(self.ctx.session_id());
    }
}

fn attempt(stmt: &mut dyn Statement, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Outcome, DatabaseError> {
    stmt.pre_execute(ctx, max_rows)?;
    stmt.execute(ctx, max_rows)
}

/// Sleeps until the busy condition may have cleared. Delays requested by the
/// statement itself do not count against the contention budget.
async fn backoff(signal: BusySignal, contended_since: &mut Option<Instant>, settings: SessionSettings) -> Result<(), DatabaseError> {
    if signal.reason == BusyReason::Delay {
        *contended_since = None;
    } else {
        let since = *contended_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= settings.busy_timeout {
            let ms = u64::try_from(settings.busy_timeout.as_millis()).unwrap_or(u64::MAX);
            return Err(DatabaseError::BusyTimeout(ms));
        }
    }
    let wait = signal
        .remaining()
        .clamp(Duration::from_millis(1), settings.poll_interval.max(Duration::from_millis(1)));
    tokio::time::sleep(wait).await;
    Ok(())
}

/// prepare, then pre_execute/execute until something other than busy comes
/// back, then hand the result out and complete
async fn drive(
    stmt: &mut dyn Statement,
    ctx: &mut ExecutionContext,
    settings: SessionSettings,
) -> Result<StatementResult, DatabaseError> {
    stmt.prepare(ctx)?;
    let mut contended_since = None;
    let outcome = loop {
        match attempt(stmt, ctx, settings.max_rows) {
            Ok(outcome) => break outcome,
            Err(DatabaseError::Busy(signal)) => {
                if let Err(err) = backoff(signal, &mut contended_since, settings).await {
                    warn!(session = ctx.session_id(), statement = stmt.id(), "gave up waiting: {signal}");
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    };

    let result = match outcome {
        Outcome::ResultSet => StatementResult::Rows(stmt.result_set()?),
        Outcome::UpdateCount(n) => StatementResult::Updated(n),
    };

    let mut contended_since = None;
    loop {
        match stmt.complete(ctx, true) {
            Ok(()) => break,
            Err(DatabaseError::Busy(signal)) => backoff(signal, &mut contended_since, settings).await?,
            Err(err) => return Err(err),
        }
    }
    debug!(session = ctx.session_id(), statement = stmt.id(), "statement completed");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SessionGrant, Value};
    use crate::executor::EngineSettings;
    use crate::transaction::LockCoordinator;
    use rusqlite::Connection;
    use std::sync::Arc;

    fn session(registry: &SessionRegistry, id: SessionId, settings: SessionSettings) -> Session {
        let ctx = ExecutionContext::with_connection(
            Connection::open_in_memory().unwrap(),
            id,
            Arc::new(LockCoordinator::new()),
            EngineSettings::default(),
            SessionGrant::superuser("root", "main"),
        )
        .unwrap();
        Session::new(ctx, registry.clone(), settings)
    }

    #[tokio::test]
    async fn test_execute_returning_through_driver() {
        let registry = SessionRegistry::new();
        let mut s = session(&registry, 1, SessionSettings::default());
        s.execute_sql("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)").await.unwrap();
        let result = s
            .execute_sql("INSERT INTO t(v) VALUES ('a'),('b') RETURNING id, v")
            .await
            .unwrap();
        let StatementResult::Rows(rows) = result else {
            panic!("expected rows");
        };
        assert_eq!(rows.affected_rows, 2);
        assert_eq!(rows.column_values("id"), vec![&Value::Integer(1), &Value::Integer(2)]);
        assert!(!s.context().in_transaction());
    }

    #[tokio::test]
    async fn test_sleep_through_driver() {
        let registry = SessionRegistry::new();
        let mut s = session(&registry, 1, SessionSettings::default());
        let started = Instant::now();
        let result = s.execute_sql("SELECT SLEEP(0.05)").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(result, StatementResult::Rows(ResultSet::scalar("SLEEP(0.05)", Value::Integer(0))));
    }

    #[tokio::test]
    async fn test_error_is_returned_and_session_stays_usable() {
        let registry = SessionRegistry::new();
        let mut s = session(&registry, 1, SessionSettings::default());
        assert!(s.execute_sql("SELECT * FROM missing").await.is_err());
        assert_eq!(s.execute_sql("SELECT 1").await.unwrap(), StatementResult::Rows(ResultSet {
            columns: vec!["1".into()],
            rows: vec![vec![Value::Integer(1)]],
            affected_rows: 0,
        }));
    }

    #[tokio::test]
    async fn test_registry_tracks_session() {
        let registry = SessionRegistry::new();
        {
            let _s = session(&registry, 7, SessionSettings::default());
            assert!(registry.get(7).is_some());
        }
        assert!(registry.get(7).is_none());
    }
}
