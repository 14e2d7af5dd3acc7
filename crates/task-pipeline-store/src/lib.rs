mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, RocksStoreConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use task_pipeline_core::{PipelineError, ResultStore};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Column family not found: {0}")]
    MissingColumnFamily(&'static str),

    #[error("Corrupt counter value for {key}: {len} bytes")]
    CorruptCounter { key: String, len: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn into_write(self) -> PipelineError {
        PipelineError::StoreWrite(self.to_string())
    }

    pub(crate) fn into_read(self) -> PipelineError {
        PipelineError::StoreRead(self.to_string())
    }
}

/// Which backend hosts the results and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rocksdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Open the configured backend
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ResultStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Rocksdb => {
            let store = RocksStore::open(RocksStoreConfig {
                data_dir: config.data_dir.clone(),
            })?;
            Ok(Arc::new(store))
        }
    }
}
