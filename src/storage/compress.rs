//! Value compression
//!
//! Large values are stored LZ4-compressed with the uncompressed length
//! prepended, so decompression needs nothing but the stored bytes.

use bytes::Bytes;

/// Minimum number of bytes compression must save before it is worth keeping.
pub const MIN_SAVING: usize = 4;

/// Errors raised when a stored value cannot be restored.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("corrupt compressed value: {0}")]
    Corrupt(#[from] lz4_flex::block::DecompressError),
}

/// Compresses `data`, returning `None` unless the result is at least
/// [`MIN_SAVING`] bytes smaller than the input.
pub fn compress(data: &[u8]) -> Option<Bytes> {
    let compressed = lz4_flex::compress_prepend_size(data);
    if compressed.len() + MIN_SAVING <= data.len() {
        Some(Bytes::from(compressed))
    } else {
        None
    }
}

/// Restores a value produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Bytes, CodecError> {
    let restored = lz4_flex::decompress_size_prepended(data)?;
    Ok(Bytes::from(restored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressible_data() {
        let data = vec![b'a'; 64 * 1024];
        let compressed = compress(&data).expect("repetitive data should compress");
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), Bytes::from(data));
    }

    #[test]
    fn test_incompressible_data_rejected() {
        // Short, high-entropy input gains nothing from LZ4
        let data: Vec<u8> = (0..64u32).map(|i| (i * 97 % 251) as u8).collect();
        assert!(compress(&data).is_none());
    }

    #[test]
    fn test_corrupt_input() {
        assert!(decompress(&[10, 0, 0, 0, 0xf0]).is_err());
    }
}
