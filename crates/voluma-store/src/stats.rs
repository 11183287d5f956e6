//! Per-brick min/max statistics.
//!
//! One record per brick per component, stored in the same 1D order as the
//! ToC. The block doubles as an acceleration structure: a renderer can
//! skip bricks whose value range misses the transfer function.

use voluma_core::{Error, Result, Scalar};

use crate::wire::{ByteReader, ByteWriter, Endianness};

/// Value range of one component within one brick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrickStats {
    pub min: f64,
    pub max: f64,
}

impl BrickStats {
    /// Empty range; any sample tightens it.
    pub const EMPTY: Self = Self {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    /// Widen the range to include `v`.
    #[inline]
    pub fn update(&mut self, v: f64) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    /// Widen the range to include another range.
    #[inline]
    pub fn merge(&mut self, other: Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl Default for BrickStats {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Fold a run of contiguous samples into per-component ranges.
///
/// `bytes` holds whole voxels; component `c` of voxel `i` lands in
/// `acc[c]`, so `acc.len()` must equal the component count.
pub fn accumulate_min_max<T: Scalar>(acc: &mut [BrickStats], bytes: &[u8]) {
    let width = std::mem::size_of::<T>();
    debug_assert_eq!(bytes.len() % (width * acc.len()), 0);
    for (i, chunk) in bytes.chunks_exact(width).enumerate() {
        let v = bytemuck::pod_read_unaligned::<T>(chunk);
        acc[i % acc.len()].update(v.to_f64());
    }
}

/// The statistics block: per-brick per-component value ranges.
#[derive(Clone, Debug)]
pub struct StatsBlock {
    component_count: u32,
    /// Brick-major, component-minor.
    records: Vec<BrickStats>,
}

impl StatsBlock {
    /// Create an empty block for `brick_count` bricks.
    pub fn new(brick_count: u64, component_count: u32) -> Self {
        let records = vec![BrickStats::EMPTY; (brick_count * u64::from(component_count)) as usize];
        Self {
            component_count,
            records,
        }
    }

    /// Components per voxel.
    #[inline]
    pub fn component_count(&self) -> u32 {
        self.component_count
    }

    /// Number of bricks covered.
    #[inline]
    pub fn brick_count(&self) -> u64 {
        (self.records.len() / self.component_count as usize) as u64
    }

    fn record_range(&self, index: u64) -> Result<std::ops::Range<usize>> {
        if index >= self.brick_count() {
            return Err(Error::OutOfRange(format!(
                "brick index {index} past statistics for {} bricks",
                self.brick_count()
            )));
        }
        let start = (index * u64::from(self.component_count)) as usize;
        Ok(start..start + self.component_count as usize)
    }

    /// Store the per-component ranges of one brick.
    pub fn set(&mut self, index: u64, per_component: &[BrickStats]) -> Result<()> {
        if per_component.len() != self.component_count as usize {
            return Err(Error::OutOfRange(format!(
                "expected {} component records, got {}",
                self.component_count,
                per_component.len()
            )));
        }
        let range = self.record_range(index)?;
        self.records[range].copy_from_slice(per_component);
        Ok(())
    }

    /// Range of one component of one brick.
    pub fn component_min_max(&self, index: u64, component: u32) -> Result<BrickStats> {
        if component >= self.component_count {
            return Err(Error::OutOfRange(format!(
                "component {component} past count {}",
                self.component_count
            )));
        }
        let range = self.record_range(index)?;
        Ok(self.records[range.start + component as usize])
    }

    /// Value range of a brick across all components.
    pub fn min_max(&self, index: u64) -> Result<(f64, f64)> {
        let range = self.record_range(index)?;
        let mut all = BrickStats::EMPTY;
        for r in &self.records[range] {
            all.merge(*r);
        }
        Ok((all.min, all.max))
    }

    /// Whether `v` lies within the brick's value range.
    pub fn contains_value(&self, index: u64, v: f64) -> Result<bool> {
        let (min, max) = self.min_max(index)?;
        Ok(v >= min && v <= max)
    }

    /// Whether `[lo, hi]` intersects the brick's value range.
    pub fn contains_range(&self, index: u64, lo: f64, hi: f64) -> Result<bool> {
        let (min, max) = self.min_max(index)?;
        Ok(hi >= min && lo <= max)
    }

    /// Serialize in ToC order.
    pub fn encode(&self, endian: Endianness) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(endian, 16 + self.records.len() * 16);
        w.put_u64(self.brick_count());
        w.put_u32(self.component_count);
        w.put_u32(0);
        for r in &self.records {
            w.put_f64(r.min);
            w.put_f64(r.max);
        }
        w.into_vec()
    }

    /// Deserialize a block written by [`StatsBlock::encode`].
    pub fn decode(bytes: &[u8], endian: Endianness) -> Result<Self> {
        let mut r = ByteReader::new(bytes, endian);
        let brick_count = r.u64()?;
        let component_count = r.u32()?;
        r.skip(4)?;
        if component_count == 0 {
            return Err(Error::Format("statistics block with zero components".into()));
        }
        let n = brick_count
            .checked_mul(u64::from(component_count))
            .ok_or_else(|| Error::Format("statistics record count overflow".into()))?;
        if r.remaining() as u64 != n * 16 {
            return Err(Error::Format(format!(
                "statistics block holds {} bytes, expected {}",
                r.remaining(),
                n * 16
            )));
        }
        let mut records = Vec::with_capacity(n as usize);
        for _ in 0..n {
            records.push(BrickStats {
                min: r.f64()?,
                max: r.f64()?,
            });
        }
        Ok(Self {
            component_count,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_typed_samples() {
        let samples: [u16; 6] = [5, 1000, 3, 7, 2, 500];
        let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut acc = [BrickStats::EMPTY; 2];
        accumulate_min_max::<u16>(&mut acc, &bytes);
        // Components interleave: evens are component 0, odds component 1.
        assert_eq!((acc[0].min, acc[0].max), (2.0, 5.0));
        assert_eq!((acc[1].min, acc[1].max), (7.0, 1000.0));
    }

    #[test]
    fn queries() {
        let mut block = StatsBlock::new(2, 1);
        block.set(0, &[BrickStats { min: 1.0, max: 4.0 }]).unwrap();
        block.set(1, &[BrickStats { min: -2.0, max: 0.5 }]).unwrap();

        assert_eq!(block.min_max(0).unwrap(), (1.0, 4.0));
        assert!(block.contains_value(0, 1.0).unwrap());
        assert!(!block.contains_value(0, 4.5).unwrap());
        assert!(block.contains_range(1, 0.0, 9.0).unwrap());
        assert!(!block.contains_range(1, 0.6, 9.0).unwrap());
        assert!(block.min_max(2).is_err());
    }

    #[test]
    fn multi_component_aggregation() {
        let mut block = StatsBlock::new(1, 3);
        block
            .set(
                0,
                &[
                    BrickStats { min: 0.0, max: 1.0 },
                    BrickStats { min: -5.0, max: 0.0 },
                    BrickStats { min: 2.0, max: 9.0 },
                ],
            )
            .unwrap();
        assert_eq!(block.min_max(0).unwrap(), (-5.0, 9.0));
        let g = block.component_min_max(0, 1).unwrap();
        assert_eq!((g.min, g.max), (-5.0, 0.0));
        assert!(block.component_min_max(0, 3).is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        for endian in [Endianness::Little, Endianness::Big] {
            let mut block = StatsBlock::new(3, 2);
            for i in 0..3u64 {
                block
                    .set(
                        i,
                        &[
                            BrickStats {
                                min: i as f64,
                                max: i as f64 + 0.5,
                            },
                            BrickStats {
                                min: -(i as f64),
                                max: 100.0,
                            },
                        ],
                    )
                    .unwrap();
            }
            let bytes = block.encode(endian);
            let decoded = StatsBlock::decode(&bytes, endian).unwrap();
            assert_eq!(decoded.brick_count(), 3);
            assert_eq!(decoded.component_count(), 2);
            for i in 0..3u64 {
                assert_eq!(decoded.min_max(i).unwrap(), block.min_max(i).unwrap());
            }
        }
    }

    #[test]
    fn decode_rejects_truncated_block() {
        let block = StatsBlock::new(2, 1);
        let mut bytes = block.encode(Endianness::Little);
        bytes.pop();
        assert!(StatsBlock::decode(&bytes, Endianness::Little).is_err());
    }
}
