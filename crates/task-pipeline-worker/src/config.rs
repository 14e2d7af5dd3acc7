use serde::{Deserialize, Serialize};
use std::time::Duration;
use task_pipeline_core::{DEFAULT_GROUP, DEFAULT_SUBJECT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_address: String,
    /// Store endpoint; the broker address when unset
    pub store_address: Option<String>,
    pub subject: String,
    pub group: String,
    pub worker_id: Option<String>,
    /// Upper bound on handlers running at once
    pub max_in_flight: usize,
    pub handler_timeout_secs: Option<u64>,
    /// Unset means drain waits for every handler
    pub drain_timeout_secs: Option<u64>,
    pub metrics_port: u16,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            broker_address: "127.0.0.1:4222".to_string(),
            store_address: None,
            subject: DEFAULT_SUBJECT.to_string(),
            group: DEFAULT_GROUP.to_string(),
            worker_id: None,
            max_in_flight: 16,
            handler_timeout_secs: None,
            drain_timeout_secs: None,
            metrics_port: 8000,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn store_address(&self) -> &str {
        self.store_address.as_deref().unwrap_or(&self.broker_address)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();

        format!("{}-{}-{}", hostname, pid, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.subject, "tasks");
        assert_eq!(config.group, "workers");
        assert_eq!(config.metrics_port, 8000);
        assert_eq!(config.store_address(), "127.0.0.1:4222");
        assert!(config.drain_timeout().is_none());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
broker_address: broker:4222
store_address: store:4222
max_in_flight: 4
drain_timeout_secs: 30
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store_address(), "store:4222");
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.drain_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.group, "workers");
    }

    #[test]
    fn test_worker_id() {
        let config = WorkerConfig {
            worker_id: Some("w-1".to_string()),
            ..Default::default()
        };
        assert_eq!(config.generate_worker_id(), "w-1");

        let generated = WorkerConfig::default().generate_worker_id();
        assert!(generated.contains(&std::process::id().to_string()));
    }
}
