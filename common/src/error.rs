//! Error types shared at component boundaries.
//!
//! Service-loop code uses `anyhow::Result`, matching the teacher's `main.rs`;
//! these `thiserror` enums are for callers that branch on the failure kind.

use thiserror::Error;

/// Errors surfaced by the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("task serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("setting {key} could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by the enrichment lookups.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("circuit breaker '{0}' is open")]
    BreakerOpen(String),

    #[error("rate limit '{0}' exhausted")]
    RateLimited(String),
}

/// Errors surfaced by the graph projector.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph store error: {0}")]
    Store(#[from] neo4rs::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
