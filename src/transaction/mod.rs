// Transaction module - write lock coordination, busy scheduling, transaction records

mod busy;
mod lock;
mod state;

pub use busy::{BusyContext, BusyKind, BusyPoll, BusyReason, BusyScheduler, BusySignal};
pub use lock::{LockCoordinator, WriteLock};
pub use state::{AccessMode, Behavior, Transaction, TransactionMode};
