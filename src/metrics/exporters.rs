use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[cfg(feature = "metrics")]
static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

#[cfg(not(feature = "metrics"))]
static PROMETHEUS: OnceCell<()> = OnceCell::new();

/// Устанавливает глобальный Prometheus recorder. Повторный вызов ничего не делает.
pub fn install_recorder() -> bool {
    #[cfg(feature = "metrics")]
    {
        if PROMETHEUS.get().is_some() {
            return true;
        }
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = PROMETHEUS.set(handle);
                info!("Prometheus metrics recorder installed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder");
                false
            }
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = PROMETHEUS.get();
        warn!("Built without the `metrics` feature; /metrics will stay empty");
        false
    }
}

/// Экспортер метрик в текстовом формате Prometheus.
pub async fn metrics_handler() -> impl IntoResponse {
    debug!("Metrics handler called");
    #[cfg(feature = "metrics")]
    let body = PROMETHEUS.get().map(PrometheusHandle::render).unwrap_or_default();
    #[cfg(not(feature = "metrics"))]
    let body = String::new();
    (StatusCode::OK, body)
}
