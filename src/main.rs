// src/main.rs

use anyhow::Context;
use axum::serve;
use key_relay::cli::{Cli, Commands};
use key_relay::config::{self, AppConfig};
use key_relay::core::BackupReaper;
use key_relay::{create_router, metrics, setup_configuration, AppState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!(signal = "Ctrl+C", "Received signal. Initiating graceful shutdown...") },
        () = terminate => { info!(signal = "Terminate", "Received signal. Initiating graceful shutdown...") },
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("invalid configuration at {}", config_path.display()))?;
    println!(
        "Configuration OK: {} (port {}, storage {}, retention {}h, max hops {})",
        config_path.display(),
        config.server.port,
        if config.redis_url.is_some() { "redis" } else { "memory" },
        config.pool.backup_retention_hours,
        config.pool.max_failover_hops,
    );
    Ok(())
}

async fn serve_app(cli: &Cli, config_path: &Path) -> anyhow::Result<()> {
    let mut app_config: AppConfig = setup_configuration(config_path)?;
    if let Some(host) = &cli.host {
        app_config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        app_config.server.port = port;
    }

    if !metrics::install_recorder() {
        warn!("Prometheus recorder not installed; /metrics will be empty");
    }

    let state = Arc::new(AppState::new(&app_config).await?);
    let shutdown = CancellationToken::new();
    let reaper = BackupReaper::new(state.pool.store(), app_config.pool.reaper_interval())
        .spawn(shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", app_config.server.host))?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(server.address = %addr, error = ?e, "Failed to bind to address. Exiting.");
        e
    })?;
    info!(server.address = %addr, "Server listening");

    let app = create_router(state);
    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = ?e, "Server run loop encountered an error. Exiting.");
            e
        })?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        warn!(error = %e, "Backup reaper task ended abnormally");
    }
    info!("Server shut down gracefully.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing(!cli.no_json);

    let config_path = config::resolve_config_path(cli.config.as_deref());
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::CheckConfig => check_config(&config_path),
        Commands::Serve => serve_app(&cli, &config_path).await,
    }
}
