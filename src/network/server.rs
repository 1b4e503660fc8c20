use std::path::PathBuf;
use std::sync::Arc;

use comfy_table::{presets::UTF8_FULL, Cell, Table as ComfyTable};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::session::{Session, SessionSettings, StatementResult};
use crate::config::ServerConfig;
use crate::core::{Catalog, DatabaseError, SessionGrant};
use crate::executor::{EngineSettings, ExecutionContext, SessionRegistry};
use crate::parser::{parse_statement, StatementDescriptor, StatementKind};
use crate::transaction::LockCoordinator;

/// Shared state of the server. Every connection gets its own SQLite handle;
/// the lock coordinator and the registry are common to all of them.
#[derive(Clone)]
pub struct Server {
    catalog: Arc<Mutex<Catalog>>,
    lock: LockCoordinator,
    registry: SessionRegistry,
    database_path: PathBuf,
    database_name: String,
    engine: EngineSettings,
    session: SessionSettings,
}

impl Server {
    /// Создает сервер из конфигурации
    pub fn new(config: &ServerConfig) -> Result<Self, DatabaseError> {
        let catalog = config.build_catalog()?;
        info!(
            superuser = %config.superuser,
            database = %config.database_name,
            path = %config.database_path.display(),
            users = catalog.users.len(),
            "server initialized"
        );
        Ok(Self {
            catalog: Arc::new(Mutex::new(catalog)),
            lock: LockCoordinator::new(),
            registry: SessionRegistry::new(),
            database_path: config.database_path.clone(),
            database_name: config.database_name.clone(),
            engine: config.engine_settings(),
            session: config.session_settings(),
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Аутентификация и открытие сессии. `database` defaults to the served one.
    pub async fn login(&self, username: &str, password: &str, database: Option<&str>) -> Result<Session, DatabaseError> {
        let database = database.unwrap_or(&self.database_name);
        if database != self.database_name {
            return Err(DatabaseError::PermissionDenied(format!("unknown database '{database}'")));
        }
        let grant = self.catalog.lock().await.authenticate(username, password, database)?;
        self.open_session(grant)
    }

    pub fn open_session(&self, grant: SessionGrant) -> Result<Session, DatabaseError> {
        let id = self.registry.allocate_id();
        let ctx = ExecutionContext::open(&self.database_path, id, Arc::new(self.lock.clone()), self.engine, grant)?;
        Ok(Session::new(ctx, self.registry.clone(), self.session))
    }

    pub async fn start(&self, addr: &str) -> Result<(), DatabaseError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "LiteGate is ready");

        loop {
            let (socket, peer) = listener.accept().await?;
            info!(%peer, "new connection");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_client(socket).await {
                    error!(%peer, error = %e, "error handling client");
                }
            });
        }
    }

    async fn handle_client(&self, mut socket: TcpStream) -> Result<(), DatabaseError> {
        let (reader, mut writer) = socket.split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"Welcome to LiteGate!\nLOGIN <user> <password> [database]\n")
            .await?;
        writer.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let mut session = match self.login_line(line.trim()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "login rejected");
                writer.write_all(Self::format_error(&e).as_bytes()).await?;
                return Ok(());
            }
        };
        writer
            .write_all(format!("OK session {}\nlitegate> \n", session.id()).as_bytes())
            .await?;
        writer.flush().await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }

            let query = line.trim();
            if query.is_empty() {
                writer.write_all(b"litegate> \n").await?;
                writer.flush().await?;
                continue;
            }
            if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
                writer.write_all(b"Goodbye!\n").await?;
                break;
            }

            let response = match self.run_query(&mut session, query).await {
                Ok(result) => Self::format_result(result),
                Err(e) => Self::format_error(&e),
            };
            writer.write_all(response.as_bytes()).await?;

            if session.is_terminated() {
                writer.write_all(b"Connection killed\n").await?;
                info!(session = session.id(), "connection killed");
                break;
            }
            writer.write_all(b"litegate> \n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    async fn login_line(&self, line: &str) -> Result<Session, DatabaseError> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(cmd), Some(user), Some(password), database, None) if cmd.eq_ignore_ascii_case("LOGIN") => {
                let session = self.login(user, password, database).await?;
                info!(session = session.id(), %user, "client authenticated");
                Ok(session)
            }
            _ => Err(DatabaseError::AuthenticationFailed),
        }
    }

    async fn run_query(&self, session: &mut Session, query: &str) -> Result<StatementResult, DatabaseError> {
        let descriptor = parse_statement(query)?;
        if descriptor.is_administrative() {
            session.context().check_privilege(descriptor.required_privilege())?;
            let database = session.context().grant().database.clone();
            return self.run_admin(&database, &descriptor).await;
        }
        session.execute(descriptor).await
    }

    /// CREATE USER / GRANT / REVOKE change the shared catalog; open sessions
    /// keep the privileges they logged in with. The caller has checked for superuser.
    async fn run_admin(&self, default_db: &str, descriptor: &StatementDescriptor) -> Result<StatementResult, DatabaseError> {
        let mut catalog = self.catalog.lock().await;
        match &descriptor.kind {
            StatementKind::CreateUser { username, password, is_superuser } => {
                catalog.create_user(username, password, *is_superuser)?;
            }
            StatementKind::Grant { privileges, database, username } => {
                catalog.grant(database.as_deref().unwrap_or(default_db), username, privileges)?;
            }
            StatementKind::Revoke { privileges, database, username } => {
                catalog.revoke(database.as_deref().unwrap_or(default_db), username, privileges)?;
            }
            other => {
                return Err(DatabaseError::Invariant(format!("{other:?} is not an administrative statement")));
            }
        }
        info!(command = %descriptor.command, "catalog updated");
        Ok(StatementResult::Updated(0))
    }

    fn format_result(result: StatementResult) -> String {
        match result {
            StatementResult::Updated(n) => format!("OK, {n} rows affected\n"),
            StatementResult::Rows(rows) => {
                if rows.is_empty() {
                    return "(0 rows)\n".to_string();
                }

                let mut table = ComfyTable::new();
                table.load_preset(UTF8_FULL);
                table.set_header(rows.columns.iter().map(Cell::new));
                for row in &rows.rows {
                    table.add_row(row.iter().map(|v| Cell::new(v.to_string())));
                }

                format!("{table}\n({} rows)\n", rows.len())
            }
        }
    }

    fn format_error(err: &DatabaseError) -> String {
        format!("ERROR {}: {err}\n", err.sqlstate())
    }
}
