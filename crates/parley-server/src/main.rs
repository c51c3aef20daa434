//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Durable storage in ./parley.redb (default)
//! parley-server --bind 0.0.0.0:8080
//!
//! # In-memory storage, broadcast timestamps in UTC+3
//! parley-server --storage memory --utc-offset +03:00
//! ```

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use parley_server::{
    DeliveryConfig, MemoryStorage, RedbStorage, Server, ServerError, ServerRuntimeConfig, Storage,
    parse_utc_offset,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    /// Volatile, lost on exit
    Memory,
    /// Durable redb file
    Redb,
}

/// Parley messaging server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Parley real-time messaging server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "PARLEY_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StorageKind::Redb)]
    storage: StorageKind,

    /// Path of the redb database file
    #[arg(long, env = "PARLEY_DB", default_value = "parley.redb")]
    db_path: String,

    /// Fixed UTC offset for broadcast timestamps (±HH:MM)
    #[arg(long, default_value = "+00:00", allow_hyphen_values = true)]
    utc_offset: String,

    /// Delivery worker queue capacity
    #[arg(long, default_value = "1024")]
    queue_capacity: usize,

    /// Per-connection outbound queue capacity
    #[arg(long, default_value = "64")]
    outbound_capacity: usize,

    /// bcrypt cost factor for new password hashes (4-31)
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    password_cost: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    tracing::info!("Parley server starting");

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        delivery: DeliveryConfig { utc_offset: parse_utc_offset(&args.utc_offset)? },
        queue_capacity: args.queue_capacity,
        outbound_capacity: args.outbound_capacity,
        password_cost: args.password_cost,
    };

    match args.storage {
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on exit");
            serve(config, MemoryStorage::new()).await
        },
        StorageKind::Redb => {
            tracing::info!("Opening database at {}", args.db_path);
            serve(config, RedbStorage::open(&args.db_path)?).await
        },
    }
}

async fn serve<S: Storage>(config: ServerRuntimeConfig, storage: S) -> Result<(), ServerError> {
    let server = Server::bind(config, storage).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await
}
