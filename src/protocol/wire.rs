//! Low-level payload encoding: LEB128 varints, length-prefixed UTF-8
//! strings, and raw byte blobs. Frames themselves are length-prefixed by
//! `tokio_util::codec::LengthDelimitedCodec` in `net::connection`; this
//! module only concerns itself with what is *inside* one frame's body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BrokerError, Result};

pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        } else {
            buf.put_u8(byte | 0x80);
        }
    }
}

pub fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(BrokerError::InvalidArgument("truncated varint".into()));
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(BrokerError::InvalidArgument("varint too long".into()));
        }
    }
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(BrokerError::InvalidArgument("truncated string".into()));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| BrokerError::InvalidArgument("invalid utf-8 in string field".into()))
}

pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

pub fn get_bytes(buf: &mut Bytes) -> Result<Vec<u8>> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(BrokerError::InvalidArgument("truncated byte field".into()));
    }
    Ok(buf.split_to(len).to_vec())
}

pub fn put_optional_string(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_string(buf, s);
        }
        None => buf.put_u8(0),
    }
}

pub fn get_optional_string(buf: &mut Bytes) -> Result<Option<String>> {
    if !buf.has_remaining() {
        return Err(BrokerError::InvalidArgument("truncated optional field".into()));
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(get_string(buf)?)),
    }
}

pub fn put_optional_u64(buf: &mut BytesMut, v: Option<u64>) {
    match v {
        Some(v) => {
            buf.put_u8(1);
            put_varint(buf, v);
        }
        None => buf.put_u8(0),
    }
}

pub fn get_optional_u64(buf: &mut Bytes) -> Result<Option<u64>> {
    if !buf.has_remaining() {
        return Err(BrokerError::InvalidArgument("truncated optional field".into()));
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(get_varint(buf)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            let mut bytes = buf.freeze();
            assert_eq!(get_varint(&mut bytes).unwrap(), value);
        }
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello/world");
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes).unwrap(), "hello/world");
    }

    #[test]
    fn optional_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_optional_string(&mut buf, Some("x"));
        put_optional_string(&mut buf, None);
        let mut bytes = buf.freeze();
        assert_eq!(get_optional_string(&mut bytes).unwrap(), Some("x".to_string()));
        assert_eq!(get_optional_string(&mut bytes).unwrap(), None);
    }

    #[test]
    fn truncated_string_errs() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 10);
        buf.put_slice(b"short");
        let mut bytes = buf.freeze();
        assert!(get_string(&mut bytes).is_err());
    }
}
