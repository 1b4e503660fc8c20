// LiteGate - multi-client server in front of a single-writer SQLite database
// Statements run as resumable state machines so no worker ever blocks on the write lock

// Clippy configuration
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]

// Core types (errors, values, users and privileges)
pub mod core;

// Statement classifier
pub mod parser;

// Write lock, busy scheduler, transaction records
pub mod transaction;

// Execution context and statement state machines
pub mod executor;

// TCP server and session driver
pub mod network;

// Layered server configuration
pub mod config;

pub use crate::config::ServerConfig;
pub use crate::core::{DatabaseError, ResultSet, Value};
pub use executor::{ExecutionContext, Statement};
pub use network::{Server, Session, StatementResult};
pub use parser::parse_statement;
pub use transaction::{LockCoordinator, WriteLock};
