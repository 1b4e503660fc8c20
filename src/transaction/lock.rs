use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::core::{DatabaseError, SessionId};

/// Process-wide write gate in front of the single-writer engine.
///
/// `acquire` never waits longer than `timeout` and reports failure instead of
/// erroring, so callers can turn contention into a busy signal.
pub trait WriteLock: Send + Sync + std::fmt::Debug {
    /// Re-entrant for the current owner
    fn acquire(&self, session: SessionId, timeout: Duration) -> bool;

    /// Idempotent for the owner; a non-owner releasing a held lock is an invariant violation
    fn release(&self, session: SessionId) -> Result<(), DatabaseError>;
}

#[derive(Debug, Default)]
struct LockState {
    owner: Mutex<Option<SessionId>>,
    released: Condvar,
}

/// Single-token lock coordinator shared by every session of the server
///
/// Clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct LockCoordinator {
    state: Arc<LockState>,
}

impl LockCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WriteLock for LockCoordinator {
    fn acquire(&self, session: SessionId, timeout: Duration) -> bool {
        let mut owner = self.state.owner.lock();
        if owner.is_some_and(|o| o != session) && !timeout.is_zero() {
            self.state
                .released
                .wait_while_for(&mut owner, |o| o.is_some_and(|o| o != session), timeout);
        }
        match *owner {
            None => {
                *owner = Some(session);
                debug!(session, "write lock acquired");
                true
            }
            Some(o) => o == session,
        }
    }

    fn release(&self, session: SessionId) -> Result<(), DatabaseError> {
        let mut owner = self.state.owner.lock();
        match *owner {
            None => Ok(()),
            Some(o) if o == session => {
                *owner = None;
                drop(owner);
                self.state.released.notify_one();
                debug!(session, "write lock released");
                Ok(())
            }
            Some(o) => Err(DatabaseError::Invariant(format!(
                "session {session} released the write lock held by session {o}"
            ))),
        }
    }
}
