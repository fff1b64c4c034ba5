use anyhow::Result;
use facematch_core::FaceService;
use facematch_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{FaceMatchService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        model_version = %config.model_version,
        "facematchd starting"
    );

    let store = SqliteStore::open(&config.db_path)?;
    let service = FaceService::new(store, config.service_settings());
    let engine = engine::spawn_engine(service, config.queue_depth)?;

    let iface = FaceMatchService::new(
        engine,
        config.db_path.display().to_string(),
        config.match_threshold,
    );

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facematchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facematchd shutting down");

    Ok(())
}
