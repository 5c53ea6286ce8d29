//! Wire protocol: length-prefixed frames over TCP (framing itself lives in
//! `net::connection`, built on `tokio_util::codec::LengthDelimitedCodec`),
//! a shared request/response envelope, and the compact binary payload
//! encoding used inside each frame body. JSON is reserved for the admin
//! HTTP surface (spec.md §4.1).

pub mod request;
pub mod response;
pub mod wire;

pub use request::{EngineTag, RequestEnvelope, decode_envelope};
pub use response::{Status, encode_push, encode_response};
