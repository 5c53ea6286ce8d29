//! Store wire commands and entries (spec.md §3, §4.3, §6).

use bytes::{Bytes, BytesMut};

use crate::error::{BrokerError, Result};
use crate::protocol::wire::{get_bytes, get_optional_u64, get_string, put_bytes, put_optional_u64, put_string};

pub const CMD_SET: u8 = 0;
pub const CMD_GET: u8 = 1;
pub const CMD_DEL: u8 = 2;

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Vec<u8>,
    /// Absolute expiry, milliseconds since epoch. `None` means no TTL.
    pub expires_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

pub enum Command {
    Set { key: String, value: Vec<u8>, ttl_ms: Option<u64> },
    Get { key: String },
    Del { key: String },
}

impl Command {
    pub fn decode(command: u8, mut payload: Bytes) -> Result<Self> {
        match command {
            CMD_SET => {
                let key = get_string(&mut payload)?;
                let value = get_bytes(&mut payload)?;
                let ttl_ms = get_optional_u64(&mut payload)?;
                Ok(Command::Set { key, value, ttl_ms })
            }
            CMD_GET => Ok(Command::Get { key: get_string(&mut payload)? }),
            CMD_DEL => Ok(Command::Del { key: get_string(&mut payload)? }),
            other => Err(BrokerError::InvalidArgument(format!("unknown store command {other}"))),
        }
    }
}

pub fn encode_set_reply() -> Bytes {
    Bytes::new()
}

pub fn encode_get_reply(found: Option<&[u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    match found {
        Some(value) => {
            buf.extend_from_slice(&[1u8]);
            put_bytes(&mut buf, value);
        }
        None => buf.extend_from_slice(&[0u8]),
    }
    buf.freeze()
}

pub fn encode_del_reply(existed: bool) -> Bytes {
    Bytes::from(vec![existed as u8])
}

/// Admin snapshot row: `{key, value_preview, created_at, expires_at}` per
/// spec.md §6.
pub struct KeySnapshot {
    pub key: String,
    pub value_preview: String,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

pub fn encode_snapshot(total_keys: usize, expiring_keys: usize, keys: &[KeySnapshot]) -> Bytes {
    let mut buf = BytesMut::new();
    put_bytes(&mut buf, &(total_keys as u64).to_be_bytes());
    put_bytes(&mut buf, &(expiring_keys as u64).to_be_bytes());
    put_bytes(&mut buf, &(keys.len() as u64).to_be_bytes());
    for k in keys {
        put_string(&mut buf, &k.key);
        put_string(&mut buf, &k.value_preview);
        put_bytes(&mut buf, &k.created_at_ms.to_be_bytes());
        put_optional_u64(&mut buf, k.expires_at_ms.map(|v| v as u64));
    }
    buf.freeze()
}
