// src/lib.rs

// --- Модули ---
pub mod admin;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pool;
pub mod state;
pub mod storage;

// --- Зависимости и пере-экспорты ---
use crate::handlers::{health_check, record_usage, report_failure, resolve_route};
use axum::{
    body::Body,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

// Пере-экспорт ключевых типов для удобства использования
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use pool::KeyPool;
pub use state::AppState;

/// Создает основной роутер Axum для приложения.
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/route/:target_id", get(resolve_route))
        .route("/route/:target_id/failures", post(report_failure))
        .route("/route/:target_id/usage", post(record_usage))
        .merge(admin::admin_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(trace_requests))
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Middleware для добавления Request ID и трассировки запросов.
async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Загружает, валидирует и логирует конфигурацию приложения.
pub fn setup_configuration(config_path: &Path) -> Result<AppConfig> {
    let config_path_display = config_path.display().to_string();
    if config_path.exists() {
        info!(config.path = %config_path_display, "Using configuration file");
    } else {
        info!(config.path = %config_path_display, "Optional configuration file not found. Using defaults and environment variables.");
    }

    let app_config = config::load_config(config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    info!(
        server.port = app_config.server.port,
        storage = if app_config.redis_url.is_some() { "redis" } else { "memory" },
        pool.backup_retention_hours = app_config.pool.backup_retention_hours,
        pool.max_failover_hops = app_config.pool.max_failover_hops,
        "Configuration loaded and validated successfully."
    );

    Ok(app_config)
}
