//! Binary encoding of embeddings for storage.
//!
//! Layout: `u32` little-endian element count, then that many `f32`
//! little-endian values. Decoding is exact: length and bit patterns survive.

use crate::types::Embedding;
use thiserror::Error;

const LEN_PREFIX: usize = 4;
const VALUE_SIZE: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("embedding blob too short: {0} bytes")]
    Truncated(usize),
    #[error("embedding blob declares {declared} values but carries {actual} bytes of data")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("embedding has {0} values, more than the encoding can express")]
    TooLong(usize),
}

/// Encode an embedding as a length-prefixed little-endian `f32` array.
pub fn encode_embedding(embedding: &Embedding) -> Result<Vec<u8>, CodecError> {
    let count =
        u32::try_from(embedding.len()).map_err(|_| CodecError::TooLong(embedding.len()))?;

    let mut bytes = Vec::with_capacity(LEN_PREFIX + embedding.len() * VALUE_SIZE);
    bytes.extend_from_slice(&count.to_le_bytes());
    for &v in &embedding.values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode a blob produced by [`encode_embedding`].
pub fn decode_embedding(bytes: &[u8]) -> Result<Embedding, CodecError> {
    if bytes.len() < LEN_PREFIX {
        return Err(CodecError::Truncated(bytes.len()));
    }
    let (prefix, data) = bytes.split_at(LEN_PREFIX);
    let mut count = [0u8; LEN_PREFIX];
    count.copy_from_slice(prefix);
    let declared = u32::from_le_bytes(count) as usize;

    if declared.checked_mul(VALUE_SIZE) != Some(data.len()) {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: data.len(),
        });
    }

    let values = data
        .chunks_exact(VALUE_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(Embedding { values })
}
