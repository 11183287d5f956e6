//! Per-brick compression for the voluma volume store.
//!
//! A brick payload is encoded independently of every other brick. The
//! encoder falls back to the identity codec whenever compression does not
//! make the payload strictly smaller, so a stored brick is never larger
//! than its raw bytes; the stored tag reflects the final choice.

use voluma_core::{Error, Result};

/// Deflate level used for brick payloads.
const DEFLATE_LEVEL: u8 = 6;

/// Brick payload codec.
///
/// The discriminants are the on-disk codec tags of the ToC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Codec {
    /// Raw bytes, stored as-is.
    #[default]
    Identity = 0,
    /// Deflate (zlib-style) compression.
    Deflate = 1,
}

impl Codec {
    /// On-disk codec tag.
    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Decode an on-disk codec tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::Identity),
            1 => Ok(Self::Deflate),
            other => Err(Error::Codec(format!("unknown codec tag {other}"))),
        }
    }
}

/// A brick payload after encoding.
#[derive(Clone, Debug)]
pub struct EncodedBrick {
    /// Codec actually used (identity when compression did not shrink).
    pub codec: Codec,
    /// Encoded bytes.
    pub data: Vec<u8>,
}

/// Encode a brick payload with the requested codec.
///
/// Falls back to [`Codec::Identity`] when the encoded form is not smaller
/// than the input.
pub fn encode(raw: &[u8], codec: Codec) -> EncodedBrick {
    match codec {
        Codec::Identity => EncodedBrick {
            codec: Codec::Identity,
            data: raw.to_vec(),
        },
        Codec::Deflate => {
            let compressed = miniz_oxide::deflate::compress_to_vec(raw, DEFLATE_LEVEL);
            if compressed.len() < raw.len() {
                EncodedBrick {
                    codec: Codec::Deflate,
                    data: compressed,
                }
            } else {
                EncodedBrick {
                    codec: Codec::Identity,
                    data: raw.to_vec(),
                }
            }
        }
    }
}

/// Decode a brick payload, checking the declared uncompressed length.
pub fn decode(encoded: &[u8], codec: Codec, expected_len: usize) -> Result<Vec<u8>> {
    let raw = match codec {
        Codec::Identity => encoded.to_vec(),
        Codec::Deflate => miniz_oxide::inflate::decompress_to_vec_with_limit(encoded, expected_len)
            .map_err(|e| Error::Codec(format!("deflate decode failed: {e}")))?,
    };
    if raw.len() != expected_len {
        return Err(Error::Codec(format!(
            "decoded length {} does not match declared length {expected_len}",
            raw.len()
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        assert_eq!(Codec::from_tag(0).unwrap(), Codec::Identity);
        assert_eq!(Codec::from_tag(1).unwrap(), Codec::Deflate);
        assert!(Codec::from_tag(2).is_err());
    }

    #[test]
    fn identity_roundtrip() {
        let raw = vec![7u8; 64];
        let enc = encode(&raw, Codec::Identity);
        assert_eq!(enc.codec, Codec::Identity);
        assert_eq!(decode(&enc.data, enc.codec, raw.len()).unwrap(), raw);
    }

    #[test]
    fn deflate_shrinks_redundant_data() {
        let raw = vec![0u8; 4096];
        let enc = encode(&raw, Codec::Deflate);
        assert_eq!(enc.codec, Codec::Deflate);
        assert!(enc.data.len() < raw.len());
        assert_eq!(decode(&enc.data, enc.codec, raw.len()).unwrap(), raw);
    }

    #[test]
    fn incompressible_data_falls_back_to_identity() {
        // A short pseudo-random payload that deflate cannot shrink.
        let raw: Vec<u8> = (0u32..64)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
            .collect();
        let enc = encode(&raw, Codec::Deflate);
        assert_eq!(enc.codec, Codec::Identity);
        assert_eq!(enc.data, raw);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let raw = vec![1u8; 1024];
        let enc = encode(&raw, Codec::Deflate);
        assert_eq!(enc.codec, Codec::Deflate);
        let truncated = &enc.data[..enc.data.len() / 2];
        assert!(decode(truncated, Codec::Deflate, raw.len()).is_err());
    }

    #[test]
    fn wrong_expected_length_is_an_error() {
        let raw = vec![3u8; 128];
        let enc = encode(&raw, Codec::Identity);
        assert!(decode(&enc.data, enc.codec, 64).is_err());
    }
}
