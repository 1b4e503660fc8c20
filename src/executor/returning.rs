// INSERT ... RETURNING on top of plain INSERT + SELECT.
//
// The rows an INSERT created are found by row id: `low` is max(rowid) + 1
// taken before the insert, `high` is the last inserted row id taken after.
// Both reads and the insert happen under the write lock, so no other writer
// can put rows into that range.

use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::statement::{query_rows, Outcome, Statement};
use crate::core::{DatabaseError, ResultSet, StatementId};
use crate::parser::{ReturningSpec, StatementDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Init,
    TxBegin,
    SelectLowId,
    InsertRows,
    SelectHighId,
    SelectReturning,
    TxEnd,
}

pub struct ReturningInsert {
    id: StatementId,
    descriptor: StatementDescriptor,
    spec: ReturningSpec,
    max_rowid_sql: String,
    select_sql: String,
    prepared: bool,
    step: Step,
    opened_implicit: bool,
    low: Option<i64>,
    high: Option<i64>,
    inserted: u64,
    produced: bool,
    result: Option<ResultSet>,
}

impl ReturningInsert {
    pub fn new(id: StatementId, descriptor: StatementDescriptor, spec: ReturningSpec) -> Self {
        let table = spec.qualified_table();
        let max_rowid_sql = format!("SELECT max(rowid) FROM {table}");
        let select_sql = format!(
            "SELECT {} FROM {table} WHERE (rowid BETWEEN ?1 AND ?2) OR (?1 IS NULL AND rowid <= ?2) ORDER BY rowid",
            spec.returning
        );
        Self {
            id,
            descriptor,
            spec,
            max_rowid_sql,
            select_sql,
            prepared: false,
            step: Step::Init,
            opened_implicit: false,
            low: None,
            high: None,
            inserted: 0,
            produced: false,
            result: None,
        }
    }

    /// Row id range of the last execution: `(low, high)`
    #[must_use]
    pub const fn watermarks(&self) -> (Option<i64>, Option<i64>) {
        (self.low, self.high)
    }

    fn fail(&mut self, ctx: &mut ExecutionContext, err: DatabaseError) -> DatabaseError {
        if err.is_retryable() {
            return err;
        }
        if matches!(err, DatabaseError::Invariant(_)) {
            warn!(statement = self.id, step = ?self.step, error = %err, "RETURNING aborted");
        }
        if std::mem::take(&mut self.opened_implicit) {
            if let Err(rollback_err) = ctx.rollback_implicit() {
                warn!(statement = self.id, error = %rollback_err, "implicit rollback failed");
            }
        }
        self.step = Step::Init;
        self.low = None;
        self.high = None;
        err
    }

    /// Runs one step; `Some` when the statement has a result to hand out
    fn advance(&mut self, ctx: &mut ExecutionContext, max_rows: usize) -> Result<Option<Outcome>, DatabaseError> {
        match self.step {
            Step::Init => {
                self.low = None;
                self.high = None;
                self.inserted = 0;
                self.produced = false;
                self.result = None;
                if ctx.autocommit() && !ctx.in_transaction() {
                    self.step = Step::TxBegin;
                } else {
                    ctx.activate(self.id, true)?;
                    self.step = Step::SelectLowId;
                }
            }
            Step::TxBegin => {
                ctx.begin_implicit(self.id, true)?;
                self.opened_implicit = true;
                self.step = Step::SelectLowId;
            }
            Step::SelectLowId => {
                let max: Option<i64> = ctx
                    .connection()
                    .prepare_cached(&self.max_rowid_sql)?
                    .query_row([], |row| row.get(0))?;
                self.low = match max {
                    Some(max) => Some(max.checked_add(1).ok_or_else(|| {
                        DatabaseError::EngineFull(format!("no row ids left in table {}", self.spec.table))
                    })?),
                    None => None,
                };
                self.step = Step::InsertRows;
            }
            Step::InsertRows => {
                let inserted = ctx
                    .connection()
                    .prepare_cached(&self.spec.insert_sql)?
                    .execute(params_from_iter(self.descriptor.params.iter()))?;
                self.inserted = inserted as u64;
                self.step = if inserted == 0 { Step::SelectReturning } else { Step::SelectHighId };
            }
            Step::SelectHighId => {
                let high = ctx.connection().last_insert_rowid();
                if let Some(low) = self.low {
                    if high < low {
                        return Err(DatabaseError::Invariant(format!(
                            "row id watermark went backwards on {}: low {low}, high {high}",
                            self.spec.table
                        )));
                    }
                }
                self.high = Some(high);
                self.step = Step::SelectReturning;
            }
            Step::SelectReturning => {
                let mut rows = query_rows(ctx.connection(), &self.select_sql, params![self.low, self.high], max_rows)?;
                rows.affected_rows = self.inserted;
                debug!(
                    statement = self.id,
                    low = ?self.low,
                    high = ?self.high,
                    rows = rows.len(),
                    "RETURNING rows selected"
                );
                self.result = Some(rows);
                self.produced = true;
                self.step = if self.opened_implicit { Step::TxEnd } else { Step::Init };
                return Ok(Some(Outcome::ResultSet));
            }
            Step::TxEnd => {
                return Err(DatabaseError::Invariant(format!(
                    "statement {} executed again before its result was completed",
                    self.id
                )));
            }
        }
        Ok(None)
    }
}

/// Name of the INTEGER PRIMARY KEY column, which SQLite stores as the row id
fn rowid_alias(conn: &Connection, spec: &ReturningSpec) -> Result<Option<String>, DatabaseError> {
    let mut stmt = conn.prepare_cached("SELECT name, type FROM pragma_table_info(?1, ?2) WHERE pk > 0")?;
    let keys = stmt
        .query_map(params![spec.table, spec.schema.as_deref().unwrap_or("main")], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match keys.as_slice() {
        [(name, ty)] if ty.eq_ignore_ascii_case("INTEGER") => Some(name.clone()),
        _ => None,
    })
}

impl Statement for ReturningInsert {
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
        if self.spec.explicit_rowid {
            return Err(DatabaseError::Unsupported(
                "INSERT ... RETURNING with an explicit row id column".to_string(),
            ));
        }
        let conn = ctx.connection();
        if let Some(alias) = rowid_alias(conn, &self.spec)? {
            if self.spec.columns.iter().any(|c| c.eq_ignore_ascii_case(&alias)) {
                return Err(DatabaseError::Unsupported(format!(
                    "INSERT ... RETURNING with an explicit value for row id alias {alias}"
                )));
            }
            // without a column list every row supplies its own row id
            if self.spec.columns.is_empty() && !self.spec.default_values {
                return Err(DatabaseError::Unsupported(format!(
                    "INSERT ... RETURNING into {} needs a column list without row id alias {alias}",
                    self.spec.table
                )));
            }
        }
        conn.prepare_cached(&self.max_rowid_sql)?;
        conn.prepare_cached(&self.spec.insert_sql)?;
        conn.prepare_cached(&self.select_sql)?;
        self.prepared = true;
        Ok(())
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
        if !self.produced {
            return Err(DatabaseError::Invariant(format!(
                "RETURNING rows of statement {} requested at step {:?}",
                self.id, self.step
            )));
        }
        self.result.take().ok_or_else(|| {
            DatabaseError::Invariant(format!("RETURNING rows of statement {} already taken", self.id))
        })
    }

    fn update_count(&self) -> Option<u64> {
        self.produced.then_some(self.inserted)
    }

    fn complete(&mut self, ctx: &mut ExecutionContext, success: bool) -> Result<(), DatabaseError> {
        let step = std::mem::replace(&mut self.step, Step::Init);
        let opened = std::mem::take(&mut self.opened_implicit);
        let finished = if opened { step == Step::TxEnd } else { step == Step::Init && self.produced };
        if success && !finished {
            if opened {
                ctx.rollback_implicit()?;
            }
            return Err(DatabaseError::Invariant(format!(
                "RETURNING statement {} completed from step {step:?}",
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
