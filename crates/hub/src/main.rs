use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scrape_common::config::{config_path_from_env, load_toml};
use scrape_common::repository::{InMemoryRepository, Repository};
use scrape_hub::config::HubConfig;
use scrape_hub::{Supervisor, TaskManager};
use scrape_protocol::memory_transport::InMemoryTransport;
use scrape_protocol::QueueChannel;
use uuid::Uuid;

struct AppState {
    supervisor: Arc<Supervisor>,
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

    tracing::info!("scrape hub starting");

    let config_path = config_path_from_env("SCRAPE_HUB_CONFIG", "config/hub.toml");
    let config: HubConfig = if config_path.exists() {
        match load_toml(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "failed to load hub configuration — refusing to start");
                std::process::exit(1);
            }
        }
    } else {
        tracing::warn!(path = %config_path.display(), "no config file found, using defaults");
        HubConfig::default()
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

    // A real deployment injects a durable Repository here; the in-memory
    // one ships as the default so the binary is runnable standalone.
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());

    let task_manager = Arc::new(TaskManager::new(
        Arc::clone(&repository),
        config.task_manager,
    ));
    if let Err(err) = task_manager.initialize().await {
        tracing::error!(error = %err, "failed to initialize task manager — refusing to start");
        std::process::exit(1);
    }

    let supervisor = Supervisor::new(
        self_id,
        Arc::clone(&channel),
        Arc::clone(&repository),
        Arc::clone(&task_manager),
        config.shared.heartbeat,
    );
    supervisor.register_handlers().await;

    let consumer = tokio::spawn(Arc::clone(&channel).consume());

    let dispatcher = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(Arc::clone(&task_manager).start(move |task| {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.dispatch_task(task).await }
        }))
    };

    let event_loop = tokio::spawn(Arc::clone(&supervisor).run());

    let state = Arc::new(AppState {
        supervisor: Arc::clone(&supervisor),
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

    tracing::info!(port, "scrape hub listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let shutdown = supervisor.shutdown_handle();
            let _ = shutdown.send(()).await;
            // Let the event loop shut down every Heartbeater before we tear
            // down the rest of the process — aborting it here would race
            // that cleanup against the task's own exit.
            let _ = event_loop.await;
        }
    }

    consumer.abort();
    dispatcher.abort();
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let known_workers = state.supervisor.known_workers().await.len();
    Json(serde_json::json!({
        "status": "healthy",
        "known_workers": known_workers,
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
