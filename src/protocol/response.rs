//! Response envelope encoding. Every reply echoes the request id it answers
//! so a connection may receive replies out of order relative to the
//! requests it issued (spec.md §4.1).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::BrokerError;

use super::wire::{put_string, put_varint};

pub enum Status {
    Ok,
    Err(BrokerError),
}

pub fn encode_response(request_id: u64, status: Status, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(1); // frame kind: response
    put_varint(&mut buf, request_id);
    match status {
        Status::Ok => {
            buf.put_u8(0);
            buf.put_slice(payload);
        }
        Status::Err(err) => {
            buf.put_u8(1);
            put_string(&mut buf, err.kind());
            put_string(&mut buf, &err.to_string());
        }
    }
    buf.freeze()
}

/// Push frames (stream delivery, pubsub delivery, queue delivery to a
/// long-poll waiter that was parked and later fulfilled) carry a
/// subscription id rather than a request id.
pub fn encode_push(subscription_id: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(2); // frame kind: push
    put_varint(&mut buf, subscription_id);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_carries_payload() {
        let frame = encode_response(9, Status::Ok, b"abc");
        assert_eq!(frame[0], 1);
        assert!(frame.ends_with(b"abc"));
    }

    #[test]
    fn err_response_carries_kind_and_message() {
        let frame = encode_response(9, Status::Err(BrokerError::NotFound("q1".into())), b"");
        assert_eq!(frame[0], 1);
        // kind string "NotFound" should appear verbatim in the encoded body.
        assert!(frame.windows(b"NotFound".len()).any(|w| w == b"NotFound"));
    }

    #[test]
    fn push_frame_uses_distinct_kind_byte() {
        let frame = encode_push(5, b"data");
        assert_eq!(frame[0], 2);
    }
}
