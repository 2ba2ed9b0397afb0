use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.vibetune.VibeTune1";
const OBJECT_PATH: &str = "/org/vibetune/VibeTune1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vibetuned starting");

    let config = config::Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        market = %config.market,
        catalog_credentials = config.credentials().is_some(),
        "configuration loaded"
    );
    if config.credentials().is_none() {
        tracing::warn!("no catalog credentials; playlists will be empty until SPOTIPY_CLIENT_ID/SECRET are set");
    }

    let (engine, engine_exit) = engine::spawn_engine(config)?;
    let service = dbus_interface::VibeTuneService { engine };

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "vibetuned ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("vibetuned shutting down");
        }
        panicked = engine_exit.wait() => {
            tracing::error!(panicked, "engine thread stopped; exiting");
            anyhow::bail!("engine thread stopped");
        }
    }

    Ok(())
}
