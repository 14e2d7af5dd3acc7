use serde::{Deserialize, Serialize};
use task_pipeline_core::DEFAULT_SUBJECT;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub broker_address: String,
    /// Store endpoint; the broker address when unset
    pub store_address: Option<String>,
    pub subject: String,
    pub log_level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            broker_address: "127.0.0.1:4222".to_string(),
            store_address: None,
            subject: DEFAULT_SUBJECT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ApiConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_address(&self) -> &str {
        self.store_address.as_deref().unwrap_or(&self.broker_address)
    }
}
