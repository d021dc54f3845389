//! Encoding of wire messages.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns wire messages into bytes and back.
///
/// Every serde type is supported; the engine only relies on round trips of
/// values, changes, and [`Envelope`](crate::Envelope)s being lossless.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON encoding through `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
