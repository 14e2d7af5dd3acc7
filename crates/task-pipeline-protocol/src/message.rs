use serde::{Deserialize, Serialize};

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Publish = 1,
    Subscribe = 2,
    Unsubscribe = 3,
    Put = 4,
    Get = 5,
    Incr = 6,
    GetCounter = 7,
    DbSize = 8,
    Ping = 9,
    Deliver = 10,
    Ack = 11,
    Nack = 12,
    Value = 13,
    Count = 14,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Publish),
            2 => Some(MessageType::Subscribe),
            3 => Some(MessageType::Unsubscribe),
            4 => Some(MessageType::Put),
            5 => Some(MessageType::Get),
            6 => Some(MessageType::Incr),
            7 => Some(MessageType::GetCounter),
            8 => Some(MessageType::DbSize),
            9 => Some(MessageType::Ping),
            10 => Some(MessageType::Deliver),
            11 => Some(MessageType::Ack),
            12 => Some(MessageType::Nack),
            13 => Some(MessageType::Value),
            14 => Some(MessageType::Count),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Publish a payload on a subject
    Publish(PublishRequest),

    /// Start receiving deliveries for a subject
    Subscribe(SubscribeRequest),

    /// Stop receiving deliveries
    Unsubscribe(UnsubscribeRequest),

    /// Store a value under a key
    Put(PutRequest),

    /// Read a key
    Get(KeyRequest),

    /// Atomically increment a counter
    Incr(KeyRequest),

    /// Read a counter
    GetCounter(KeyRequest),

    /// Approximate number of stored keys
    DbSize,

    /// Liveness probe
    Ping,

    /// Server push: a message routed to one of the connection's subscriptions
    Deliver(DeliverMessage),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),

    /// Response to Get
    Value(ValueResponse),

    /// Response to Incr, GetCounter and DbSize
    Count(CountResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Publish(_) => MessageType::Publish,
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::Unsubscribe(_) => MessageType::Unsubscribe,
            Message::Put(_) => MessageType::Put,
            Message::Get(_) => MessageType::Get,
            Message::Incr(_) => MessageType::Incr,
            Message::GetCounter(_) => MessageType::GetCounter,
            Message::DbSize => MessageType::DbSize,
            Message::Ping => MessageType::Ping,
            Message::Deliver(_) => MessageType::Deliver,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
            Message::Value(_) => MessageType::Value,
            Message::Count(_) => MessageType::Count,
        }
    }

    pub fn ack() -> Self {
        Message::Ack(AckResponse { message: None })
    }

    pub fn nack(error: impl Into<String>) -> Self {
        Message::Nack(NackResponse { error: error.into() })
    }
}

/// A message plus the id that correlates it with its response.
///
/// Responses carry the id of the request they answer. Server-pushed
/// deliveries use id 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: u64,
    pub message: Message,
}

impl Frame {
    pub fn new(request_id: u64, message: Message) -> Self {
        Frame { request_id, message }
    }

    pub fn push(message: Message) -> Self {
        Frame { request_id: 0, message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Connection-local subscription id chosen by the client
    pub sid: u64,
    pub subject: String,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub sid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverMessage {
    pub sid: u64,
    pub subject: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Optional message
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueResponse {
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub value: u64,
}
