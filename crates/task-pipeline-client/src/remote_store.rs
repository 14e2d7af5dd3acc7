use crate::connection::{unexpected, Connection};
use crate::ClientError;
use async_trait::async_trait;
use task_pipeline_core::{PipelineError, ResultStore};
use task_pipeline_protocol::{KeyRequest, Message, PutRequest};

/// [`ResultStore`] served by a `tq-broker` over the wire protocol.
///
/// Counter increments run inside the broker's store, so concurrent workers
/// on different hosts never race on a read-modify-write.
#[derive(Clone)]
pub struct RemoteStore {
    connection: Connection,
}

impl RemoteStore {
    pub fn new(connection: Connection) -> Self {
        RemoteStore { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn count(&self, message: Message) -> Result<u64, ClientError> {
        match self.connection.request(message).await? {
            Message::Count(count) => Ok(count.value),
            other => Err(unexpected(&other)),
        }
    }
}

fn write_error(err: ClientError) -> PipelineError {
    match err {
        ClientError::Closed | ClientError::Timeout => PipelineError::Unavailable(err.to_string()),
        other => PipelineError::StoreWrite(other.to_string()),
    }
}

fn read_error(err: ClientError) -> PipelineError {
    match err {
        ClientError::Closed | ClientError::Timeout => PipelineError::Unavailable(err.to_string()),
        other => PipelineError::StoreRead(other.to_string()),
    }
}

#[async_trait]
impl ResultStore for RemoteStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> task_pipeline_core::Result<()> {
        let response = self
            .connection
            .request(Message::Put(PutRequest {
                key: key.to_string(),
                value,
            }))
            .await
            .map_err(write_error)?;

        match response {
            Message::Ack(_) => Ok(()),
            other => Err(write_error(unexpected(&other))),
        }
    }

    async fn get(&self, key: &str) -> task_pipeline_core::Result<Option<Vec<u8>>> {
        let response = self
            .connection
            .request(Message::Get(KeyRequest { key: key.to_string() }))
            .await
            .map_err(read_error)?;

        match response {
            Message::Value(value) => Ok(value.value),
            other => Err(read_error(unexpected(&other))),
        }
    }

    async fn incr(&self, counter: &str) -> task_pipeline_core::Result<u64> {
        self.count(Message::Incr(KeyRequest { key: counter.to_string() }))
            .await
            .map_err(write_error)
    }

    async fn counter(&self, counter: &str) -> task_pipeline_core::Result<u64> {
        self.count(Message::GetCounter(KeyRequest { key: counter.to_string() }))
            .await
            .map_err(read_error)
    }

    async fn size(&self) -> task_pipeline_core::Result<u64> {
        self.count(Message::DbSize).await.map_err(read_error)
    }
}
