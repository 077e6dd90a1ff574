//! Versioned binary encoding for opaque values
//!
//! Format: [VERSION][BINCODE PAYLOAD]

use crate::common::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

pub const CODEC_VERSION: u8 = 1;

/// Encode a value into a versioned envelope
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let payload = bincode::serialize(value)?;
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_u8(CODEC_VERSION);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a value produced by [`encode`]
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    match data.split_first() {
        Some((&CODEC_VERSION, payload)) => Ok(bincode::deserialize(payload)?),
        Some((version, _)) => Err(Error::Codec(format!(
            "unsupported encoding version {}",
            version
        ))),
        None => Err(Error::Codec("empty value".into())),
    }
}
