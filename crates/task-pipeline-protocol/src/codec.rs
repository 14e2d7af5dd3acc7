use crate::{Frame, Message, MessageType, ProtocolError, Result, HEADER_SIZE, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding frames with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type]
/// [8-byte request id (big-endian)] [bincode body]
///
/// The length covers everything after the prefix.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }
        if length < HEADER_SIZE {
            return Err(ProtocolError::Protocol(format!("Frame too short: {} bytes", length)));
        }

        // Wait for complete frame
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;
        let request_id = src.get_u64();

        let body = src.split_to(length - HEADER_SIZE);

        let message = match msg_type {
            MessageType::Publish => Message::Publish(bincode::deserialize(&body)?),
            MessageType::Subscribe => Message::Subscribe(bincode::deserialize(&body)?),
            MessageType::Unsubscribe => Message::Unsubscribe(bincode::deserialize(&body)?),
            MessageType::Put => Message::Put(bincode::deserialize(&body)?),
            MessageType::Get => Message::Get(bincode::deserialize(&body)?),
            MessageType::Incr => Message::Incr(bincode::deserialize(&body)?),
            MessageType::GetCounter => Message::GetCounter(bincode::deserialize(&body)?),
            MessageType::DbSize => Message::DbSize,
            MessageType::Ping => Message::Ping,
            MessageType::Deliver => Message::Deliver(bincode::deserialize(&body)?),
            MessageType::Ack => Message::Ack(bincode::deserialize(&body)?),
            MessageType::Nack => Message::Nack(bincode::deserialize(&body)?),
            MessageType::Value => Message::Value(bincode::deserialize(&body)?),
            MessageType::Count => Message::Count(bincode::deserialize(&body)?),
        };

        Ok(Some(Frame { request_id, message }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let body = match &item.message {
            Message::Publish(req) => bincode::serialize(req)?,
            Message::Subscribe(req) => bincode::serialize(req)?,
            Message::Unsubscribe(req) => bincode::serialize(req)?,
            Message::Put(req) => bincode::serialize(req)?,
            Message::Get(req) => bincode::serialize(req)?,
            Message::Incr(req) => bincode::serialize(req)?,
            Message::GetCounter(req) => bincode::serialize(req)?,
            Message::DbSize | Message::Ping => Vec::new(),
            Message::Deliver(msg) => bincode::serialize(msg)?,
            Message::Ack(resp) => bincode::serialize(resp)?,
            Message::Nack(resp) => bincode::serialize(resp)?,
            Message::Value(resp) => bincode::serialize(resp)?,
            Message::Count(resp) => bincode::serialize(resp)?,
        };

        let total_length = HEADER_SIZE + body.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message.message_type().as_u8());
        dst.put_u64(item.request_id);
        dst.put_slice(&body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeliverMessage, PublishRequest};

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        let frame = Frame::new(
            7,
            Message::Publish(PublishRequest {
                subject: "tasks".to_string(),
                payload: br#"{"job":"resize"}"#.to_vec(),
            }),
        );

        codec.encode(frame.clone(), &mut buffer).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_bodyless_messages() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        codec.encode(Frame::new(1, Message::DbSize), &mut buffer).unwrap();
        codec.encode(Frame::new(2, Message::Ping), &mut buffer).unwrap();
        assert_eq!(buffer.len(), 2 * (4 + HEADER_SIZE));

        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().message, Message::DbSize);
        let ping = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(ping.request_id, 2);
        assert_eq!(ping.message, Message::Ping);
    }

    #[test]
    fn test_partial_message() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        let frame = Frame::push(Message::Deliver(DeliverMessage {
            sid: 3,
            subject: "tasks".to_string(),
            payload: vec![1; 64],
        }));
        codec.encode(frame.clone(), &mut buffer).unwrap();

        let full_len = buffer.len();
        let rest = buffer.split_off(full_len / 2);

        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&rest);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), frame);
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(HEADER_SIZE as u32);
        buffer.put_u8(200);
        buffer.put_u64(0);

        match codec.decode(&mut buffer) {
            Err(ProtocolError::InvalidMessageType(200)) => {}
            other => panic!("Expected InvalidMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32((MAX_MESSAGE_SIZE + 1) as u32);
        buffer.put_u8(MessageType::Publish.as_u8());

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}
