use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(bincode::Error),
    #[error("decoding failed: {0}")]
    Decode(bincode::Error),
}

/// Encodes a simulation value with the fixed-width little-endian layout shared by every peer.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(data).map_err(CodecError::Decode)
}
