//! Request envelope decoding: the part of a frame every engine shares
//! (request id, engine tag, command tag) before handing the remaining bytes
//! off to the engine-specific command decoder.

use bytes::{Buf, Bytes};

use crate::error::{BrokerError, Result};

use super::wire::get_varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    Store,
    Queue,
    Stream,
    PubSub,
    Admin,
}

impl EngineTag {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => EngineTag::Store,
            1 => EngineTag::Queue,
            2 => EngineTag::Stream,
            3 => EngineTag::PubSub,
            4 => EngineTag::Admin,
            _ => return Err(BrokerError::InvalidArgument(format!("unknown engine tag {b}"))),
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EngineTag::Store => 0,
            EngineTag::Queue => 1,
            EngineTag::Stream => 2,
            EngineTag::PubSub => 3,
            EngineTag::Admin => 4,
        }
    }
}

/// A decoded request, prior to engine-specific payload decoding.
pub struct RequestEnvelope {
    pub request_id: u64,
    pub engine: EngineTag,
    pub command: u8,
    pub payload: Bytes,
}

/// Decode the shared envelope prefix of a frame body. Any failure here is a
/// malformed frame: per spec.md §4.1 the connection is closed with no reply.
pub fn decode_envelope(mut body: Bytes) -> Result<RequestEnvelope> {
    let request_id = get_varint(&mut body)?;
    if body.remaining() < 2 {
        return Err(BrokerError::InvalidArgument("truncated envelope".into()));
    }
    let engine = EngineTag::from_u8(body.get_u8())?;
    let command = body.get_u8();
    Ok(RequestEnvelope {
        request_id,
        engine,
        command,
        payload: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use crate::protocol::wire::put_varint;

    #[test]
    fn decodes_well_formed_envelope() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 42);
        buf.put_u8(EngineTag::Queue.to_u8());
        buf.put_u8(7);
        buf.put_slice(b"rest");

        let envelope = decode_envelope(buf.freeze()).unwrap();
        assert_eq!(envelope.request_id, 42);
        assert_eq!(envelope.engine, EngineTag::Queue);
        assert_eq!(envelope.command, 7);
        assert_eq!(&envelope.payload[..], b"rest");
    }

    #[test]
    fn rejects_unknown_engine_tag() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 1);
        buf.put_u8(200);
        buf.put_u8(0);
        assert!(decode_envelope(buf.freeze()).is_err());
    }
}
