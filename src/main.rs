use coding_ci_trigger::build::BuildStore;
use coding_ci_trigger::error::BridgeError;
use coding_ci_trigger::logging::setup_logging;
use coding_ci_trigger::scheduler::QueueScheduler;
use coding_ci_trigger::{AppState, create_router, load_config};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "coding_trigger.toml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BridgeError> {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("CODING_TRIGGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;

    let bind_address = std::env::var("BIND_ADDRESS")
        .ok()
        .or_else(|| config.server.bind_address.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

    // Flushes file logs on drop, so it lives until the server stops.
    let _log_guard = setup_logging(&config.server)?;

    let builds = Arc::new(Mutex::new(BuildStore::new(config.server.max_builds)));
    let scheduler = Arc::new(QueueScheduler::new(Arc::clone(&builds)));
    let state = Arc::new(AppState::new(config, builds, scheduler)?);

    info!(
        "Loaded {} job(s) from {:?}: {}",
        state.jobs.len(),
        config_path,
        state.jobs.paths().join(", ")
    );
    if state.jobs.is_empty() {
        warn!("No jobs configured in {:?}; every webhook will get 404", config_path);
    }
    info!(
        "Webhooks are received at http://{}/{}/<job path>",
        bind_address,
        state.config.server.webhook_root.trim_matches('/')
    );

    let app = create_router(state);
    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
