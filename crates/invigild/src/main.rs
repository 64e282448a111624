use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod frame;
mod store;
mod vision;

use config::Config;
use dbus_interface::{AppState, ProctorService};
use invigil_core::{AlertEngine, SessionStore};
use store::ProctorStore;
use vision::spawn_vision;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("invigild starting");

    let config = Config::from_env();

    // Misconfigured thresholds abort here rather than misbehaving per frame
    let engine = AlertEngine::new(config.policy()).context("invalid alerting configuration")?;

    invigil_models::verify_dir(&config.model_dir)
        .context("model integrity check failed (run `invigil setup` to fetch models)")?;

    let store = ProctorStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;

    let vision = spawn_vision(&config.detector_model_path(), &config.embedder_model_path())
        .context("failed to start vision service")?;

    let session_bus = config.session_bus;
    let service = ProctorService {
        state: Arc::new(AppState {
            config,
            vision,
            store,
            engine,
            sessions: SessionStore::new(),
        }),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name("org.invigil.Proctor1")?
        .serve_at("/org/invigil/Proctor1", service)?
        .build()
        .await
        .context("failed to register on the bus")?;

    tracing::info!(session_bus, "invigild ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("invigild shutting down");

    Ok(())
}
