//! cyberwatch status API — thin read-only view over the pipeline's state.

mod routes;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::db;
use routes::{create_router, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_api=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let pool = db::create_pool(&config.pg_dsn).await?;
    let state = AppState { db: pool };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    info!(address = %config.api_bind, "API listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await?;
    info!("API shutdown complete");
    Ok(())
}
