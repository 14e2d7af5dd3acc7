use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::Value;
use std::time::Instant;
use task_pipeline_client::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[derive(Parser, Debug)]
#[command(name = "tq-admin")]
#[command(about = "Task pipeline admin CLI", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:4222", env = "TQ_BROKER_ADDR")]
    broker: String,

    /// REST API address
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "TQ_API_URL")]
    api: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a new task
    Submit {
        /// Inline JSON object
        #[arg(short, long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// File holding a JSON object
        #[arg(short = 'f', long)]
        payload_file: Option<String>,
    },

    /// Show a stored result
    Result {
        /// Result key, e.g. task:0f3c...
        key: String,
    },

    /// Get pipeline statistics
    Stats,

    /// Show API health
    Health,

    /// Round-trip a ping to the broker
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        Commands::Submit { payload, payload_file } => {
            let raw = match (payload, payload_file) {
                (Some(inline), _) => inline,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path))?,
                (None, None) => bail!("either --payload or --payload-file is required"),
            };
            let payload = parse_payload(&raw)?;

            let url = format!("{}/task", args.api);
            let response = client
                .post(&url)
                .json(&serde_json::json!({ "payload": payload }))
                .send()
                .await?;
            let response = read_json(response).await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&response)?),
                Format::Table => println!("Task {}", field(&response, "status")),
            }
        }

        Commands::Result { key } => {
            let url = format!("{}/results/{}", args.api, key);
            let response = client.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                eprintln!("Result not found");
                return Ok(());
            }
            let response = read_json(response).await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&response)?),
                Format::Table => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Field", "Value"]);
                    table.add_row(vec!["Key", key.as_str()]);
                    table.add_row(vec!["Status", &field(&response, "status")]);
                    table.add_row(vec!["Worker", &field(&response, "worker_id")]);
                    table.add_row(vec!["Completed", &field(&response, "completed_at")]);
                    table.add_row(vec!["Payload", &response["original_payload"].to_string()]);
                    if let Some(error) = response["error"].as_str() {
                        table.add_row(vec!["Error", error]);
                    }
                    println!("{table}");
                }
            }
        }

        Commands::Stats => {
            let url = format!("{}/stats", args.api);
            let response = read_json(client.get(&url).send().await?).await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&response)?),
                Format::Table => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Metric", "Value"]);
                    table.add_row(vec!["Store Keys", &field(&response, "store_size")]);
                    table.add_row(vec!["Processed", &field(&response, "processed_count")]);
                    table.add_row(vec!["Errored", &field(&response, "errored_count")]);
                    table.add_row(vec!["Broker", &field(&response, "broker_status")]);
                    if let Some(degraded) = response["degraded"].as_array() {
                        let names: Vec<_> = degraded.iter().filter_map(Value::as_str).collect();
                        table.add_row(vec!["Degraded", &names.join(", ")]);
                    }
                    println!("{table}");
                }
            }
        }

        Commands::Health => {
            let url = format!("{}/health", args.api);
            let response: Value = client.get(&url).send().await?.json().await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&response)?),
                Format::Table => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Property", "Value"]);
                    table.add_row(vec!["Status", &field(&response, "status")]);
                    table.add_row(vec!["Broker", &field(&response, "broker")]);
                    println!("{table}");
                }
            }
        }

        Commands::Ping => {
            let started = Instant::now();
            let conn = Connection::connect(&args.broker).await?;
            conn.ping().await?;
            println!("PONG from {} in {:?}", args.broker, started.elapsed());
        }
    }

    Ok(())
}

/// Tasks must be JSON objects
fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    if !value.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(value)
}

async fn read_json(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        bail!("{}: {}", status, field(&body, "error"));
    }
    Ok(body)
}

fn field(value: &Value, name: &str) -> String {
    match &value[name] {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        assert!(parse_payload(r#"{"job": "resize"}"#).is_ok());
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn test_field_rendering() {
        let value = serde_json::json!({"status": "queued", "count": 3, "missing": null});
        assert_eq!(field(&value, "status"), "queued");
        assert_eq!(field(&value, "count"), "3");
        assert_eq!(field(&value, "missing"), "-");
        assert_eq!(field(&value, "absent"), "-");
    }
}
