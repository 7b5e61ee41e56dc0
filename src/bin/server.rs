//! pdfshare server
//!
//! Serves the document sharing HTTP API.
//!
//! # Configuration
//!
//! Settings come from a YAML file (`--config`, `PDFSHARE_CONFIG`, or
//! `~/.config/pdfshare/config.yaml`) overridden by environment variables:
//! - `PDFSHARE_PORT`: Port to listen on (default: 5000)
//! - `PDFSHARE_DATA_DIR`: Directory for state and uploads (default: ~/.local/share/pdfshare)
//! - `PDFSHARE_TOKEN_SECRET`: Token signing secret (default: random per process)
//! - `PDFSHARE_TOKEN_TTL_MINUTES`: Session token lifetime, at least 1 (default: 1440)
//! - `PDFSHARE_MAX_UPLOAD_MB`: Largest accepted upload (default: 25)
//!
//! # Config File Format
//!
//! ```yaml
//! port: 5000
//! data_dir: /var/lib/pdfshare
//! token_secret: "change-me"
//! token_ttl_minutes: 1440
//! ```

use clap::Parser;
use pdfshare::config::Config;
use pdfshare::server::{router, AppState, ServerStorage, TokenService, UserStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pdfshare-server")]
#[command(version)]
#[command(about = "Document sharing server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdfshare=info,pdfshare_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config)?;

    let storage = ServerStorage::new(&config.data_dir);
    storage.ensure_dirs()?;
    tracing::info!("Data directory: {}", config.data_dir.display());

    let state = storage.load_state()?.unwrap_or_default();
    let users = UserStore::restore(state.users);

    let tokens = match &config.token_secret {
        Some(secret) => TokenService::new(secret.as_bytes(), config.token_ttl()),
        None => {
            tracing::warn!("No token_secret configured; tokens will not survive a restart");
            TokenService::with_random_secret(config.token_ttl())
        }
    };

    let state = AppState::new(users, state.documents, tokens, storage);
    let app = router(state, config.max_upload_bytes());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
