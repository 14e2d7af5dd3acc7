mod message;
mod codec;

pub use message::{
    Frame, Message, MessageType, PublishRequest, SubscribeRequest, UnsubscribeRequest,
    DeliverMessage, PutRequest, KeyRequest, AckResponse, NackResponse, ValueResponse,
    CountResponse,
};
pub use codec::FrameCodec;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum frame size: 11MB (to accommodate 10MB task payload + overhead)
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;

/// Bytes between the length prefix and the body: message type + request id
pub const HEADER_SIZE: usize = 1 + 8;
