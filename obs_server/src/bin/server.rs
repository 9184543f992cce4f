//! Process entry point: loads [`Settings`], builds [`AppState`] (which
//! spawns the task-queue scheduler as a side effect), and serves the axum
//! router on `settings.bind_addr`.

use std::env;

use tracing_subscriber::EnvFilter;

use obs_server::{build_app, AppState, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_file = env::var("OBSCTL_CONFIG_FILE").ok();
    let settings = Settings::load(config_file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind_addr = settings.bind_addr.clone();
    let state = AppState::new(settings).await?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "obs_server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
