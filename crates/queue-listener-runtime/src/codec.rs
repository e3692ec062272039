//! Payload codecs converting between domain values and message bodies.

use crate::error::SerializationError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts a payload type to and from wire bytes.
///
/// Decoding failures are reported per message; they never affect other
/// messages in the same poll.
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Bytes, SerializationError>;

    fn decode(&self, body: &[u8]) -> Result<T, SerializationError>;
}

/// UTF-8 text bodies
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStringCodec;

impl PayloadCodec<String> for RawStringCodec {
    fn encode(&self, value: &String) -> Result<Bytes, SerializationError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, body: &[u8]) -> Result<String, SerializationError> {
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| SerializationError::InvalidUtf8)
    }
}

/// JSON bodies for any serde type.
///
/// Encoding follows struct field order, so equal values always produce equal
/// bytes. FIFO content-based deduplication relies on that.
#[derive(Debug)]
pub struct JsonCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> PayloadCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes, SerializationError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, body: &[u8]) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
