use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;

use crate::core::{Catalog, DatabaseError, Privilege};
use crate::executor::EngineSettings;
use crate::network::SessionSettings;

/// Looked up in order; the first one that exists is used
const CONFIG_PATHS: [&str; 2] = ["/etc/litegate/litegate.toml", "./litegate.toml"];

/// Extra account created at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Granted on the served database
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Name clients log into and privileges are granted on
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default = "default_superuser")]
    pub superuser: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// 0 turns lock acquisition into a try-lock
    #[serde(default)]
    pub lock_wait_ms: u64,
    #[serde(default = "default_busy_retry_ms")]
    pub busy_retry_ms: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 0 = unlimited
    #[serde(default)]
    pub max_rows: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 3307 }
fn default_database_path() -> PathBuf { PathBuf::from("./litegate.db") }
fn default_database_name() -> String { "main".to_string() }
fn default_superuser() -> String { "root".to_string() }
fn default_password() -> String { "root".to_string() }
fn default_busy_retry_ms() -> u64 { 5 }
fn default_busy_timeout_ms() -> u64 { 30_000 }
fn default_poll_interval_ms() -> u64 { 50 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            database_name: default_database_name(),
            superuser: default_superuser(),
            password: default_password(),
            lock_wait_ms: 0,
            busy_retry_ms: default_busy_retry_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_rows: 0,
            log_level: default_log_level(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Priority: ENV (LITEGATE_*) > config file > defaults. CLI flags are
    /// applied on top by the binary.
    pub fn load(file: Option<&Path>) -> Result<Self, DatabaseError> {
        let mut builder = Config::builder();

        match file {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                if let Some(path) = CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::with_name(path));
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("LITEGATE").try_parsing(true));

        Ok(builder.build()?.try_deserialize()?)
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            busy_retry: Duration::from_millis(self.busy_retry_ms),
        }
    }

    #[must_use]
    pub const fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_rows: self.max_rows,
        }
    }

    /// Superuser plus the seed users with their grants
    pub fn build_catalog(&self) -> Result<Catalog, DatabaseError> {
        let mut catalog = Catalog::initialize(&self.superuser, &self.password, &self.database_name);
        for seed in &self.users {
            catalog.create_user(&seed.username, &seed.password, seed.superuser)?;
            if let Some(user) = catalog.users.get_mut(&seed.username) {
                user.read_only = seed.read_only;
            }
            catalog.grant(&self.database_name, &seed.username, &seed.privileges)?;
            info!(user = %seed.username, privileges = seed.privileges.len(), "seed user created");
        }
        Ok(catalog)
    }
}
