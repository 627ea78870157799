//! Inkwell API Server
//!
//! Serves the posts API with row-level authorization.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (0.0.0.0:8080, in-memory storage)
//! cargo run
//!
//! # Start on custom host and port
//! cargo run -- --host 127.0.0.1 --port 9090
//!
//! # Persist to PostgreSQL
//! cargo run --features postgres -- --database-url postgres://localhost/inkwell
//!
//! # Log every rule decision
//! RUST_LOG=inkwell_authz=debug cargo run
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging filter (trace, debug, info, warn, error)
//! - `INKWELL_HOST`: Server host (default: 0.0.0.0)
//! - `INKWELL_PORT`: Server port (default: 8080)
//! - `INKWELL_DATABASE_URL`: PostgreSQL connection string
//! - `INKWELL_JSON_LOGS`: Emit JSON logs

use anyhow::Result;
use api_server::{server::ServerBuilder, state::AppState};
use clap::Parser;
use inkwell_authz::{store::InMemoryBackend, Backend};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Inkwell API Server
#[derive(Parser, Debug)]
#[command(
    name = "inkwell-server",
    version,
    about = "Posts API with row-level authorization",
    long_about = None
)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "INKWELL_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "8080", env = "INKWELL_PORT")]
    port: u16,

    /// PostgreSQL connection string; in-memory storage when omitted
    #[arg(long, env = "INKWELL_DATABASE_URL")]
    database_url: Option<String>,

    /// Enable JSON logging format
    #[arg(long, env = "INKWELL_JSON_LOGS")]
    json_logs: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Inkwell API server");

    let backend = open_backend(args.database_url.as_deref()).await?;
    let server = ServerBuilder::new()
        .host(&args.host)
        .port(args.port)
        .state(AppState::new(backend))
        .build()?;

    if let Err(e) = server.run().await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_backend(database_url: Option<&str>) -> Result<Arc<dyn Backend>> {
    match database_url {
        Some(url) => {
            let backend = inkwell_authz::store::PostgresBackend::new(url).await?;
            backend.ensure_schema().await?;
            info!("Using PostgreSQL storage");
            Ok(Arc::new(backend))
        }
        None => {
            info!("Using in-memory storage");
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_backend(database_url: Option<&str>) -> Result<Arc<dyn Backend>> {
    if database_url.is_some() {
        anyhow::bail!("a database URL was given but this build lacks the `postgres` feature");
    }
    info!("Using in-memory storage");
    Ok(Arc::new(InMemoryBackend::new()))
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "inkwell_server={level},api_server={level},inkwell_authz={level},tower_http=info",
            level = log_level
        ))
    })
}

fn init_tracing(args: &Args) {
    let registry = tracing_subscriber::registry().with(env_filter(&args.log_level));

    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}
