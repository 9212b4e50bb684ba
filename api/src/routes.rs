//! API router and application state.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    database: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service health status", body = HealthResponse)),
)]
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        database: db_ok,
    })
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    targets_total: i64,
    measurements_total: i64,
    asns_total: i64,
    unenriched_hops: i64,
    measurements_pending_graph: i64,
}

#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    responses((status = 200, description = "Pipeline counters", body = StatusResponse)),
)]
async fn pipeline_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let targets_total: i64 = count(&state.db, "SELECT COUNT(*) FROM targets").await;
    let measurements_total: i64 = count(&state.db, "SELECT COUNT(*) FROM measurements").await;
    let asns_total: i64 = count(&state.db, "SELECT COUNT(*) FROM asns").await;
    let unenriched_hops: i64 = count(
        &state.db,
        "SELECT COUNT(*) FROM hops h JOIN measurements m ON m.id = h.measurement_id \
         WHERE m.enriched = false AND h.ip IS NOT NULL AND h.asn IS NULL",
    )
    .await;
    let measurements_pending_graph: i64 = count(
        &state.db,
        "SELECT COUNT(*) FROM measurements WHERE enriched = true AND graph_built = false",
    )
    .await;

    Json(StatusResponse {
        targets_total,
        measurements_total,
        asns_total,
        unenriched_hops,
        measurements_pending_graph,
    })
}

async fn count(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap_or(0)
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, pipeline_status),
    components(schemas(HealthResponse, StatusResponse)),
    tags((name = "health"), (name = "status"))
)]
struct ApiDoc;

#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(pipeline_status))
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds_without_panicking() {
        let _ = ApiDoc::openapi();
    }
}
