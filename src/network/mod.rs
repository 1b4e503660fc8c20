// Network module - TCP server, text protocol and the per-connection session driver

pub mod server;
pub mod session;

pub use server::Server;
pub use session::{Session, SessionSettings, StatementResult};
