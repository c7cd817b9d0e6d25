// src/handlers/mod.rs

pub mod routing;

pub use routing::{record_usage, report_failure, resolve_route};

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
    )
}
