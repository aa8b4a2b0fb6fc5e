//! askdocs API Gateway
//!
//! Process entry point: configuration, logging, metrics exporter, component
//! wiring and the HTTP server.

use anyhow::Context;
use askdocs_common::{
    config::AppConfig,
    corpus::{PassageSource, SqliteCorpus},
    metrics, QueryOrchestrator,
};
use askdocs_gateway::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);
    config.validate()?;

    info!(
        service = %config.observability.service_name,
        "Starting askdocs API Gateway v{}",
        askdocs_common::VERSION
    );

    // Initialize metrics
    init_metrics(&config)?;

    // Wire the pipeline
    let corpus: Arc<dyn PassageSource> = Arc::new(SqliteCorpus::from_config(&config.corpus)?);
    if let Err(e) = corpus.ping().await {
        warn!(error = %e, url = %config.corpus.url, "Corpus not reachable yet, queries will fail until it is");
    }
    let orchestrator = QueryOrchestrator::from_config(&config, corpus)?;

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host: {}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);

    let app = create_router(AppState::new(config, orchestrator));

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let port = config.observability.metrics_port;
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
