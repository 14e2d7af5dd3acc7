use task_pipeline_api::{create_router, ApiConfig, AppState};
use task_pipeline_client::{Connection, Producer, RemoteStore};
use task_pipeline_core::Broker;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tq-api")]
#[command(about = "Task pipeline ingestion and status API", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, env = "TQ_API_CONFIG")]
    config: Option<String>,

    /// Listen port
    #[arg(short, long, env = "TQ_API_PORT")]
    port: Option<u16>,

    /// Broker address
    #[arg(short, long, env = "TQ_BROKER_ADDR")]
    broker: Option<String>,

    /// Result store address (defaults to the broker address)
    #[arg(long, env = "TQ_STORE_ADDR")]
    store: Option<String>,

    #[arg(long, env = "TQ_SUBJECT")]
    subject: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ApiConfig::from_file(config_path)?
    } else {
        ApiConfig::default()
    };

    init_tracing(&config.log_level, args.log_format);

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(broker) = args.broker {
        config.broker_address = broker;
    }
    if let Some(store) = args.store {
        config.store_address = Some(store);
    }
    if let Some(subject) = args.subject {
        config.subject = subject;
    }

    // The API still serves /stats while the queue is down; /task answers 503
    let producer = match Connection::connect(&config.broker_address).await {
        Ok(conn) => {
            tracing::info!("Connected to broker at {}", config.broker_address);
            let broker: Arc<dyn Broker> = Arc::new(conn);
            Producer::with_subject(broker, config.subject.clone())
        }
        Err(e) => {
            tracing::error!("Error connecting to broker at {}: {}", config.broker_address, e);
            Producer::without_broker()
        }
    };

    let store_conn = Connection::connect(config.store_address())
        .await
        .with_context(|| format!("store unreachable at {}", config.store_address()))?;
    let store = Arc::new(RemoteStore::new(store_conn.clone()));

    let app = create_router(AppState::new(producer.clone(), store));

    let addr = config.listen_address();
    tracing::info!("REST API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(broker) = producer.broker() {
        broker.close().await;
    }
    store_conn.close().await;

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
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
