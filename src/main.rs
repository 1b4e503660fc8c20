use std::path::PathBuf;

use clap::Parser;
use litegate::{Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// LiteGate server: multi-client access to a single SQLite database
#[derive(Parser, Debug)]
#[command(name = "litegated")]
#[command(about = "LiteGate database server", long_about = None)]
struct Args {
    /// Config file (default: /etc/litegate/litegate.toml or ./litegate.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Listen host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Listen port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short = 'd', long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("litegate={level},litegated={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

/// CLI args > ENV > config file > defaults
fn load_config(args: Args) -> Result<ServerConfig, litegate::DatabaseError> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.database {
        config.database_path = path;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(Args::parse())?;
    init_logging(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database_path.display(),
        superuser = %config.superuser,
        "LiteGate starting"
    );

    let server = Server::new(&config)?;
    server.start(&config.bind_addr()).await?;

    Ok(())
}
