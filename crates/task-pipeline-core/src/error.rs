use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Store read error: {0}")]
    StoreRead(String),
}

impl PipelineError {
    /// True when the failure means the transport or store is not reachable
    /// right now, as opposed to a problem with one particular message.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PipelineError::Unavailable(_) | PipelineError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
