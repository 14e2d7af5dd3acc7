use serde::{Deserialize, Serialize};
use task_pipeline_store::StoreConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub store: StoreConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Deliveries buffered per subscription before the group skips that member
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 4222,
            max_connections: 1000,
            subscriber_buffer: 64,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: 9091,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_pipeline_store::StoreBackend;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
broker:
  port: 5000
store:
  backend: rocksdb
  data_dir: /var/lib/tq
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.broker.port, 5000);
        assert_eq!(config.broker.host, "0.0.0.0");
        assert_eq!(config.broker.subscriber_buffer, 64);
        assert_eq!(config.store.backend, StoreBackend::Rocksdb);
        assert_eq!(config.monitoring.prometheus_port, 9091);
        assert_eq!(config.listen_address(), "0.0.0.0:5000");
    }
}
