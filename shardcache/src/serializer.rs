//! Wire-format serializers for cached values.
//!
//! The fan-out engine and the raw `CacheOps` surface only ever see `Bytes`;
//! everything above that boundary speaks `serde_json::Value` as a common,
//! dynamically-typed intermediate form, mirroring how the Python original's
//! `dumps`/`loads` operated on arbitrary objects rather than a fixed type.
//! Callers' own `T: Serialize + DeserializeOwned` types round-trip through
//! that `Value` via `serde_json::to_value`/`from_value` in
//! [`crate::cache::BaseCache`].

use crate::error::SerializerError;
use bytes::Bytes;
use serde_json::Value;

/// Encodes and decodes a [`Value`] to and from the bytes stored in Redis.
pub trait Serializer: Send + Sync {
    /// Serializes `value` to its wire form.
    fn encode(&self, value: &Value) -> Result<Bytes, SerializerError>;

    /// Deserializes `bytes` back into a [`Value`].
    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// JSON wire format, the façade's default (mirrors `JSONSerializer`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> Result<Bytes, SerializerError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary wire format (the Rust-native stand-in for the original's
/// `PickleSerializer` — both serve the same "opaque binary blob" role).
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn encode(&self, value: &Value) -> Result<Bytes, SerializerError> {
        let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|err| SerializerError::Bincode(err.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|err| SerializerError::Bincode(err.to_string()))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trips_a_value() {
        let value = json!({"a": 1, "b": [true, null, "x"]});
        let encoded = JsonSerializer.encode(&value).unwrap();
        assert_eq!(JsonSerializer.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn bincode_round_trips_a_value() {
        let value = json!({"n": 42, "s": "hello"});
        let encoded = BincodeSerializer.encode(&value).unwrap();
        assert_eq!(BincodeSerializer.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn json_decode_rejects_malformed_bytes() {
        assert!(JsonSerializer.decode(b"not json").is_err());
    }
}
