/// Executor module - runs statements against the session's SQLite connection
///
/// Structure:
/// - context: per-session connection, transaction and lock bookkeeping
/// - statement: the resumable `Statement` trait and the factory
/// - native / returning / sleep / transaction_control / admin: statement kinds
/// - registry: live sessions for SHOW PROCESSLIST and KILL

mod admin;
mod context;
mod native;
mod registry;
mod returning;
mod sleep;
mod statement;
mod transaction_control;

pub use admin::{KillStatement, ProcessListStatement};
pub use context::{CancelHandle, EngineSettings, ExecutionContext};
pub use native::NativeStatement;
pub use registry::{SessionInfo, SessionRegistry};
pub use returning::ReturningInsert;
pub use sleep::SleepStatement;
pub use statement::{build_statement, Outcome, Statement};
pub use transaction_control::TransactionControl;
