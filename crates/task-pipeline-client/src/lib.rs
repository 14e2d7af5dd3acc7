mod connection;
mod producer;
mod remote_store;
mod status;

pub use connection::{Connection, ConnectionOptions};
pub use producer::{Producer, Submission};
pub use remote_store::RemoteStore;
pub use status::{StatusReport, StatusReporter};

use task_pipeline_core::PipelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed")]
    Closed,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for PipelineError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ConnectionError(msg) => PipelineError::Connection(msg),
            ClientError::ServerError(msg) | ClientError::ProtocolError(msg) => {
                PipelineError::Processing(msg)
            }
            other => PipelineError::Unavailable(other.to_string()),
        }
    }
}
