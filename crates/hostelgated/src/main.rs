use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

const BUS_NAME: &str = "org.hostelgate.Gate1";
const OBJECT_PATH: &str = "/org/hostelgate/Gate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("hostelgated starting");

    let config = config::Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        visitors = %config.visitor_dir.display(),
        tolerance = config.tolerance,
        policy = ?config.match_policy,
        "configuration loaded"
    );

    let store = store::HostelStore::open(&config.db_path).await?;
    let engine = engine::Engine::new(store.clone(), tokio::runtime::Handle::current());
    let visitors = hostel_feed::VisitorStore::new(config.visitor_dir.clone());
    let session_bus = config.session_bus;

    let state = Arc::new(Mutex::new(dbus_interface::AppState {
        config,
        engine,
        store,
        visitors,
    }));
    let service = dbus_interface::GateService {
        state: Arc::clone(&state),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = if session_bus { "session" } else { "system" }, "hostelgated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("hostelgated shutting down");
    state.lock().await.engine.stop_all();

    Ok(())
}
