use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scrape_common::config::{config_path_from_env, load_toml};
use scrape_common::fetcher::Fetcher;
use scrape_protocol::memory_transport::InMemoryTransport;
use scrape_protocol::QueueChannel;
use scrape_worker::config::WorkerConfig;
use scrape_worker::{HttpFetcher, RateLimitedFetcher, Receiver};
use uuid::Uuid;

struct AppState {
    receiver: Arc<Receiver>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("scrape worker starting");

    let config_path = config_path_from_env("SCRAPE_WORKER_CONFIG", "config/worker.toml");
    let config: WorkerConfig = if config_path.exists() {
        match load_toml(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "failed to load worker configuration — refusing to start");
                std::process::exit(1);
            }
        }
    } else {
        tracing::warn!(path = %config_path.display(), "no config file found, using defaults");
        WorkerConfig::default()
    };

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let self_id = Uuid::new_v4();

    let transport = if config.broker.url.starts_with("memory://") {
        Arc::new(InMemoryTransport::new())
    } else {
        tracing::error!(
            url = %config.broker.url,
            "no broker driver configured for this URL scheme — the broker driver is external to this crate"
        );
        std::process::exit(1);
    };

    let channel = Arc::new(QueueChannel::new(transport, config.broker.queue.clone()));

    let http_fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.http_timeout));
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(RateLimitedFetcher::new(http_fetcher, config.rate_limit));

    let receiver = Receiver::new(self_id, Arc::clone(&channel), fetcher);
    receiver.register_handlers().await;

    let consumer = tokio::spawn(Arc::clone(&channel).consume());

    if let Err(err) = receiver.announce(true).await {
        tracing::error!(error = %err, "failed to announce availability");
    }

    let event_loop = tokio::spawn(Arc::clone(&receiver).run());

    let state = Arc::new(AppState {
        receiver: Arc::clone(&receiver),
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let port = config.shared.http_port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind TCP listener");

    tracing::info!(port, "scrape worker listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let shutdown = receiver.shutdown_handle();
            let _ = shutdown.send(()).await;
            // Let the event loop publish its GoingAway before we tear down
            // the rest of the process — aborting it here would race the
            // publish against the task's own exit.
            let _ = event_loop.await;
        }
    }

    consumer.abort();
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub_known = state.receiver.current_hub().await.is_some();
    Json(serde_json::json!({
        "status": "healthy",
        "current_hub_known": hub_known,
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
