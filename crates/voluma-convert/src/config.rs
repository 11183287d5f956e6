//! Conversion configuration.

use glam::UVec3;
use voluma_codec::Codec;
use voluma_store::{ChecksumKind, Endianness};

/// Configuration for a conversion run.
///
/// These are the knobs the original process-wide defaults collapsed into;
/// every converter instance carries its own copy.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Maximum brick size per axis, including overlap.
    pub max_brick_size: UVec3,
    /// Overlap band width in voxels, applied on all six faces.
    pub overlap: u32,
    /// Byte budget of the write-back brick cache.
    pub cache_bytes: u64,
    /// Codec requested for brick payloads; bricks that do not shrink are
    /// stored identity regardless.
    pub codec: Codec,
    /// Scan the input and rebuild it as 8-bit when its dynamic range
    /// exceeds 12 bits.
    pub quantize_to_u8: bool,
    /// Compute and store the per-brick statistics block.
    pub stats: bool,
    /// Byte order of the output container and every block in it.
    pub endian: Endianness,
    /// Whole-file checksum scheme of the output container.
    pub checksum: ChecksumKind,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_brick_size: UVec3::splat(128),
            overlap: 2,
            cache_bytes: 64 << 20,
            codec: Codec::Deflate,
            quantize_to_u8: false,
            stats: true,
            endian: Endianness::Little,
            checksum: ChecksumKind::Blake3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_brick_exceeds_overlap() {
        let config = ConvertConfig::default();
        let min = 2 * config.overlap + 1;
        assert!(config.max_brick_size.x >= min);
        assert!(config.max_brick_size.y >= min);
        assert!(config.max_brick_size.z >= min);
    }
}
