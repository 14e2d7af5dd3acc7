use task_pipeline_broker::{Broker, BrokerConfig};
use task_pipeline_store::StoreBackend;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{Encoder, TextEncoder};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tq-broker")]
#[command(about = "Task pipeline broker: queue-group pub/sub and result store", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "broker.yaml", env = "TQ_BROKER_CONFIG")]
    config: String,

    /// Listen host
    #[arg(long, env = "TQ_BROKER_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "TQ_BROKER_PORT")]
    port: Option<u16>,

    /// Prometheus metrics port
    #[arg(long, env = "TQ_BROKER_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Result store backend
    #[arg(long, value_enum, env = "TQ_STORE_BACKEND")]
    store_backend: Option<StoreBackendArg>,

    /// Data directory for the rocksdb backend
    #[arg(long, env = "TQ_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreBackendArg {
    Memory,
    Rocksdb,
}

impl From<StoreBackendArg> for StoreBackend {
    fn from(arg: StoreBackendArg) -> Self {
        match arg {
            StoreBackendArg::Memory => StoreBackend::Memory,
            StoreBackendArg::Rocksdb => StoreBackend::Rocksdb,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    init_tracing(&config.monitoring.log_level, args.log_format);

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.monitoring.prometheus_port = metrics_port;
    }
    if let Some(backend) = args.store_backend {
        config.store.backend = backend.into();
    }
    if let Some(data_dir) = args.data_dir {
        config.store.data_dir = data_dir;
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    // Start metrics server
    let metrics_broker = broker.clone();
    let metrics_port = config.monitoring.prometheus_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_broker, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_broker.shutdown();
    });

    broker.run().await?;

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

async fn start_metrics_server(broker: Arc<Broker>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(broker): State<Arc<Broker>>) -> Result<String, StatusCode> {
        let metrics = broker.metrics();
        let encoder = TextEncoder::new();
        let metric_families = metrics.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(broker);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
