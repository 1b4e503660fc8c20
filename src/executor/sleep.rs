use std::time::{Duration, Instant};

use tracing::debug;

use super::context::ExecutionContext;
use super::statement::{Outcome, Statement};
use crate::core::{DatabaseError, ResultSet, StatementId, Value};
use crate::parser::StatementDescriptor;
use crate::transaction::{BusyKind, BusyPoll, BusyReason, BusySignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    Waiting(Instant),
    Done,
}

/// `SLEEP(n)` without blocking a worker: installs a delay and reports busy
/// until it has elapsed. Yields 0, or 1 when interrupted by KILL QUERY.
pub struct SleepStatement {
    id: StatementId,
    descriptor: StatementDescriptor,
    seconds: Option<f64>,
    step: Step,
    result: Option<ResultSet>,
}

impl SleepStatement {
    pub fn new(id: StatementId, descriptor: StatementDescriptor, seconds: Option<f64>) -> Self {
        Self {
            id,
            descriptor,
            seconds,
            step: Step::Init,
            result: None,
        }
    }

    fn column(&self) -> String {
        match self.seconds {
            Some(s) => format!("SLEEP({s})"),
            None => "SLEEP(NULL)".to_string(),
        }
    }

    fn finish(&mut self, value: i64) -> Outcome {
        self.result = Some(ResultSet::scalar(&self.column(), Value::Integer(value)));
        self.step = Step::Done;
        Outcome::ResultSet
    }
}

impl Statement for SleepStatement {
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
        if let Err(err) = ctx.check_cancelled() {
            if matches!(self.step, Step::Waiting(_)) {
                debug!(statement = self.id, "sleep interrupted");
                return Ok(self.finish(1));
            }
            self.step = Step::Init;
            return Err(err);
        }
        match self.step {
            Step::Init => {
                self.result = None;
                let seconds = match self.seconds {
                    Some(s) if s > 0.0 => s,
                    _ => return Ok(self.finish(0)),
                };
                let delay = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| DatabaseError::Unsupported(format!("SLEEP duration {seconds} is out of range")))?;
                let deadline = Instant::now() + delay;
                ctx.busy().install(BusyKind::Delay, deadline)?;
                self.step = Step::Waiting(deadline);
                Err(DatabaseError::Busy(BusySignal::until(BusyReason::Delay, deadline)))
            }
            Step::Waiting(deadline) => match ctx.busy().poll() {
                BusyPoll::Waiting(_) => Err(DatabaseError::Busy(BusySignal::until(BusyReason::Delay, deadline))),
                BusyPoll::Matured | BusyPoll::Idle => {
                    ctx.busy().clear();
                    Ok(self.finish(0))
                }
            },
            Step::Done => Err(DatabaseError::Invariant(format!(
                "SLEEP statement {} executed again before completion",
                self.id
            ))),
        }
    }

    fn result_set(&mut self) -> Result<ResultSet, DatabaseError> {
        self.result.take().ok_or_else(|| {
            DatabaseError::Invariant(format!("SLEEP statement {} has no result yet", self.id))
        })
    }

    fn complete(&mut self, ctx: &mut ExecutionContext, success: bool) -> Result<(), DatabaseError> {
        let step = std::mem::replace(&mut self.step, Step::Init);
        if let Step::Waiting(_) = step {
            ctx.busy().clear();
        }
        if success && step != Step::Done {
            return Err(DatabaseError::Invariant(format!(
                "SLEEP statement {} completed from step {step:?}",
                self.id
            )));
        }
        Ok(())
    }
}
