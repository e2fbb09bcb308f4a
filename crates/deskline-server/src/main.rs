//! # deskline-server
//!
//! HTTP service for the Deskline support chat.
//!
//! This binary provides:
//! - **Widget endpoints** for customers to open a chat and exchange messages
//! - **Admin endpoints** for chat room and customer management
//! - **Dashboard endpoints** serving summary cards, the daily chat chart and
//!   the top-admin ranking
//!
//! Every list it serves is the snapshot of a live view kept current by the
//! store's change feeds.

mod api;
mod config;
mod error;
mod views;

use std::sync::Arc;

use deskline_live::ConnectionProvider;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::views::Backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,deskline_server=debug,deskline_live=debug")
        }))
        .init();

    info!("Starting Deskline server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admins = config.admins.len(),
        admin_token = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Connect to the store and open the live views
    // -----------------------------------------------------------------------
    let database_path = match config.database_path.clone() {
        Some(path) => path,
        None => deskline_store::database::default_path()?,
    };
    info!(path = %database_path.display(), "Using database");

    let backend = Arc::new(Backend::new(
        ConnectionProvider::sqlite(database_path),
        config.admins.clone(),
    ));

    // A failure here is not fatal: requests answer 503 and retry.
    if let Err(e) = backend.services().await {
        warn!(error = %e, "Live views unavailable at startup");
    }

    let http_addr = config.http_addr;
    let app_state = AppState {
        backend,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
