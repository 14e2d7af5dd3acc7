use task_pipeline_client::{Connection, RemoteStore};
use task_pipeline_core::Broker;
use task_pipeline_worker::{CompleteHandler, SleepHandler, TaskHandler, Worker, WorkerConfig, WorkerMetrics};
use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::{Parser, ValueEnum};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HandlerKind {
    /// Store every task as completed
    Complete,
    /// Sleep before completing
    Sleep,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tq-worker")]
#[command(about = "Task pipeline worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, env = "TQ_WORKER_CONFIG")]
    config: Option<String>,

    /// Broker address
    #[arg(short, long, env = "TQ_BROKER_ADDR")]
    broker: Option<String>,

    /// Result store address (defaults to the broker address)
    #[arg(long, env = "TQ_STORE_ADDR")]
    store: Option<String>,

    #[arg(long, env = "TQ_SUBJECT")]
    subject: Option<String>,

    #[arg(long, env = "TQ_GROUP")]
    group: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "TQ_WORKER_ID")]
    worker_id: Option<String>,

    /// Maximum concurrently running handlers
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Prometheus metrics port
    #[arg(long, env = "TQ_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, value_enum, default_value = "complete")]
    handler: HandlerKind,

    /// Sleep duration for the sleep handler
    #[arg(long, default_value = "1000")]
    sleep_ms: u64,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    init_tracing(&config.log_level, args.log_format);

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.broker_address = broker;
    }
    if let Some(store) = args.store {
        config.store_address = Some(store);
    }
    if let Some(subject) = args.subject {
        config.subject = subject;
    }
    if let Some(group) = args.group {
        config.group = group;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.max_in_flight = max_in_flight;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.metrics_port = metrics_port;
    }

    let handler: Arc<dyn TaskHandler> = match args.handler {
        HandlerKind::Complete => Arc::new(CompleteHandler),
        HandlerKind::Sleep => Arc::new(SleepHandler::new(args.sleep_ms)),
    };

    // Separate connections so deliveries never queue behind store traffic
    let broker = Connection::connect(&config.broker_address)
        .await
        .with_context(|| format!("broker unreachable at {}", config.broker_address))?;
    tracing::info!("Worker connected to broker at {}", config.broker_address);

    let store_conn = Connection::connect(config.store_address())
        .await
        .with_context(|| format!("store unreachable at {}", config.store_address()))?;
    let store = Arc::new(RemoteStore::new(store_conn.clone()));

    let metrics_port = config.metrics_port;
    let worker = Worker::new(config, Arc::new(broker), store, handler)?;

    let metrics = worker.metrics();
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    let summary = worker.run().await?;
    store_conn.close().await;

    tracing::info!("Worker shutdown complete: {:?}", summary);
    Ok(())
}

fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn start_metrics_server(metrics: Arc<WorkerMetrics>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(metrics): State<Arc<WorkerMetrics>>) -> Result<String, StatusCode> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metrics.registry.gather(), &mut buffer)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Prometheus metrics started on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
