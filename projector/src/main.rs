//! cyberwatch graph projector — turns enriched measurements into AS-graph edges.

mod edges;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::db;
use cyberwatch_common::db::queries::{
    fetch_hops_for_measurement, fetch_measurements_for_graph, mark_measurement_graph_built,
};
use cyberwatch_common::graph;
use edges::build_edges;
use neo4rs::Graph;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const BATCH_SIZE: i64 = 100;
const IDLE_POLL_SECONDS: u64 = 10;

async fn process_measurement(pool: &PgPool, graph: &Graph, measurement_id: i64, observed_at: chrono::DateTime<chrono::Utc>) -> Result<usize> {
    let hops = fetch_hops_for_measurement(pool, measurement_id).await?;
    let built_edges = build_edges(&hops);

    for edge in &built_edges {
        graph::upsert_edge(graph, &edge.a, &edge.b, edge.rtt_ms, observed_at).await?;
    }

    mark_measurement_graph_built(pool, measurement_id).await?;
    Ok(built_edges.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_projector=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting graph projector");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let graph = graph::connect(&config.graph_uri, &config.graph_user, &config.graph_password).await?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        shutdown_signal.cancel();
    });

    while !shutdown.is_cancelled() {
        let measurements = fetch_measurements_for_graph(&pool, BATCH_SIZE).await?;
        if measurements.is_empty() {
            tokio::select! {
                () = tokio::time::sleep(std::time::Duration::from_secs(IDLE_POLL_SECONDS)) => {}
                () = shutdown.cancelled() => break,
            }
            continue;
        }

        for measurement in &measurements {
            match process_measurement(&pool, &graph, measurement.id, measurement.started_at).await {
                Ok(edge_count) => info!(measurement_id = measurement.id, edge_count, "graph updated"),
                Err(e) => error!(measurement_id = measurement.id, error = %e, "graph projection failed"),
            }
        }
    }

    info!("Graph projector shutdown complete");
    Ok(())
}
