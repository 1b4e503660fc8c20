use std::time::{Duration, Instant};

use tracing::trace;

use crate::core::DatabaseError;

/// Why a statement could not make progress without blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// A user-requested delay (SLEEP) has not elapsed yet
    Delay,
    /// Another session holds the write lock
    LockContended,
    /// SQLite itself reported SQLITE_BUSY / SQLITE_LOCKED
    EngineLocked,
}

/// Payload of a retryable-busy error
#[derive(Debug, Clone, Copy)]
pub struct BusySignal {
    pub reason: BusyReason,
    /// Earliest instant at which retrying can succeed
    pub retry_at: Instant,
}

impl BusySignal {
    #[must_use]
    pub fn immediate(reason: BusyReason) -> Self {
        Self {
            reason,
            retry_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn until(reason: BusyReason, retry_at: Instant) -> Self {
        Self { reason, retry_at }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.retry_at.saturating_duration_since(Instant::now())
    }
}

impl std::fmt::Display for BusySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            BusyReason::Delay => write!(f, "Busy: delay pending for {:?}", self.remaining()),
            BusyReason::LockContended => write!(f, "Busy: write lock held by another session"),
            BusyReason::EngineLocked => write!(f, "Busy: database is locked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyKind {
    /// Wait requested by the user
    Delay,
    /// Backoff after losing a race for a shared resource
    Contention,
}

/// A pending non-blocking wait of one session
#[derive(Debug, Clone, Copy)]
pub struct BusyContext {
    pub deadline: Instant,
    pub kind: BusyKind,
}

impl BusyContext {
    #[must_use]
    pub fn is_matured(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPoll {
    Idle,
    Waiting(Duration),
    Matured,
}

/// Per-session retry scheduler.
///
/// Holds at most one [`BusyContext`]. A new context can only be installed
/// when none is pending or the pending one has matured, so a session never
/// stacks waits on top of each other.
#[derive(Debug, Default)]
pub struct BusyScheduler {
    pending: Option<BusyContext>,
}

impl BusyScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&BusyContext> {
        self.pending.as_ref()
    }

    pub fn install(&mut self, kind: BusyKind, deadline: Instant) -> Result<BusyContext, DatabaseError> {
        if let Some(existing) = &self.pending {
            if !existing.is_matured() {
                return Err(DatabaseError::Invariant(format!(
                    "busy context {:?} still pending while installing {kind:?}",
                    existing.kind
                )));
            }
        }
        let ctx = BusyContext { deadline, kind };
        trace!(?kind, "busy context installed");
        self.pending = Some(ctx);
        Ok(ctx)
    }

    #[must_use]
    pub fn poll(&self) -> BusyPoll {
        match &self.pending {
            None => BusyPoll::Idle,
            Some(ctx) if ctx.is_matured() => BusyPoll::Matured,
            Some(ctx) => BusyPoll::Waiting(ctx.deadline.saturating_duration_since(Instant::now())),
        }
    }

    pub fn clear(&mut self) {
        if let Some(ctx) = self.pending.take() {
            trace!(kind = ?ctx.kind, "busy context cleared");
        }
    }

    /// Admission check before a statement touches the engine: keeps signalling
    /// busy until a contention backoff has elapsed. Delay contexts belong to the
    /// statement that installed them and are not gated here.
    pub fn gate(&mut self) -> Result<(), DatabaseError> {
        match self.pending {
            Some(ctx) if ctx.kind == BusyKind::Contention => {
                if ctx.is_matured() {
                    self.clear();
                    Ok(())
                } else {
                    Err(DatabaseError::Busy(BusySignal::until(BusyReason::LockContended, ctx.deadline)))
                }
            }
            _ => Ok(()),
        }
    }

    /// Records contention and returns the busy error for the caller to propagate
    pub fn contended(&mut self, reason: BusyReason, backoff: Duration) -> DatabaseError {
        let deadline = Instant::now() + backoff;
        match self.pending {
            Some(ctx) if !ctx.is_matured() => {
                DatabaseError::Busy(BusySignal::until(reason, ctx.deadline.max(deadline)))
            }
            _ => {
                self.pending = Some(BusyContext {
                    deadline,
                    kind: BusyKind::Contention,
                });
                trace!(?reason, "contention recorded");
                DatabaseError::Busy(BusySignal::until(reason, deadline))
            }
        }
    }
}
