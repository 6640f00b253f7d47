//! Codec for framed protocol messages
//!
//! The codec works on plain `BytesMut` buffers, so the reactor can run it
//! directly over a transport's receive buffer without an async runtime.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::{FrameKind, Message, HANDSHAKE_PAYLOAD_SIZE};
use crate::packet::Packet;
use crate::session::{AuthId, SessionId};

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }

    /// Encode a message into a freshly allocated buffer
    pub fn encode_to_vec(message: Message) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(message, &mut buf)?;
        Ok(buf)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if let Some(expected) = header.kind.fixed_payload_len() {
            if expected != payload_len {
                return Err(ProtocolError::InvalidPayload {
                    kind: header.kind,
                    expected,
                    actual: payload_len,
                });
            }
        }

        if src.len() < payload_len {
            // Save header and wait for more data
            tracing::trace!(
                kind = ?header.kind,
                have = src.len(),
                need = payload_len,
                "Partial frame buffered"
            );
            self.pending_header = Some(header);
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(payload_len);

        let message = match header.kind {
            FrameKind::Hello => {
                let (session_id, auth_id) = decode_handshake(&mut payload);
                Message::Hello {
                    session_id,
                    auth_id,
                }
            }
            FrameKind::Welcome => {
                let (session_id, auth_id) = decode_handshake(&mut payload);
                Message::Welcome {
                    session_id,
                    auth_id,
                }
            }
            FrameKind::Data => Message::Data(Packet::new(header.sequence, payload.freeze())),
            FrameKind::Ack => Message::Ack(header.sequence),
            FrameKind::Nack => Message::Nack(header.sequence),
            FrameKind::Close => Message::Close,
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let kind = message.kind();
        let sequence = message.sequence();

        match message {
            Message::Hello {
                session_id,
                auth_id,
            }
            | Message::Welcome {
                session_id,
                auth_id,
            } => {
                FrameHeader::new(kind, sequence, HANDSHAKE_PAYLOAD_SIZE as u32).encode(dst);
                dst.put_u64(session_id.as_u64());
                dst.put_u16(auth_id.as_u16());
            }
            Message::Data(packet) => {
                let payload_len = packet.len();
                if payload_len > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: payload_len,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                FrameHeader::new(kind, sequence, payload_len as u32).encode(dst);
                dst.extend_from_slice(packet.payload());
            }
            Message::Ack(_) | Message::Nack(_) | Message::Close => {
                FrameHeader::new(kind, sequence, 0).encode(dst);
            }
        }

        Ok(())
    }
}

fn decode_handshake(payload: &mut BytesMut) -> (SessionId, AuthId) {
    let session_id = SessionId::new(payload.get_u64());
    let auth_id = AuthId::new(payload.get_u16());
    (session_id, auth_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use bytes::Bytes;

    #[test]
    fn test_codec_hello() {
        let mut codec = FrameCodec::new();

        let hello = Message::Hello {
            session_id: SessionId::new(0x0102_0304_0506_0708),
            auth_id: AuthId::new(0xBEEF),
        };

        let mut buf = BytesMut::new();
        codec.encode(hello.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + HANDSHAKE_PAYLOAD_SIZE);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, hello);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_data_message() {
        let mut codec = FrameCodec::new();

        let message = Message::Data(Packet::new(42, Bytes::from("Hello, world!")));

        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();

        match codec.decode(&mut buf).unwrap().unwrap() {
            Message::Data(packet) => {
                assert_eq!(packet.sequence(), 42);
                assert_eq!(packet.payload().as_ref(), b"Hello, world!");
            }
            other => panic!("Expected Data message, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();

        let mut full_buf =
            FrameCodec::encode_to_vec(Message::Data(Packet::new(9, &b"payload"[..]))).unwrap();

        // Header complete, payload still missing
        let mut partial = full_buf.split_to(HEADER_SIZE + 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);

        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, Message::Data(Packet::new(9, &b"payload"[..])));
    }

    #[test]
    fn test_codec_multiple_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::Ack(65535), &mut buf).unwrap();
        codec.encode(Message::Nack(3), &mut buf).unwrap();
        codec.encode(Message::Close, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Ack(65535)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Nack(3)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Close));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_rejects_bad_handshake_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Hello, 0, 3).encode(&mut buf);
        buf.extend_from_slice(&[1, 2, 3]);

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidPayload {
                kind: FrameKind::Hello,
                expected: 10,
                actual: 3
            })
        ));
    }
}
