//! 8-bit quantization pre-pass.
//!
//! A single streaming scan finds the global value range and builds a
//! 12-bit histogram. Integer data whose values all lie in `[0, 4096)`
//! keeps its native representation together with the histogram; anything
//! else is linearly remapped to `[0, 255]` and the octree is built over
//! `u8`.

use rayon::prelude::*;
use std::path::Path;
use tracing::info;

use voluma_core::{with_scalar_type, Result, Scalar, VolumeMeta};
use voluma_store::RawFile;

/// Number of histogram bins (12 bits).
pub const HISTOGRAM_BINS: usize = 4096;

/// Bytes per streamed chunk, rounded down to whole voxels.
const SCAN_CHUNK: usize = 4 << 20;

/// Result of the scan pass.
#[derive(Clone, Debug)]
pub struct ScanResult {
    pub min: f64,
    pub max: f64,
    /// Present when every sample fit the 12-bit histogram.
    pub histogram: Option<Vec<u64>>,
}

struct ChunkScan {
    min: f64,
    max: f64,
    histogram: Option<Vec<u64>>,
}

impl ChunkScan {
    fn identity(with_histogram: bool) -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            histogram: with_histogram.then(|| vec![0u64; HISTOGRAM_BINS]),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.histogram = match (self.histogram, other.histogram) {
            (Some(mut a), Some(b)) => {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                Some(a)
            }
            _ => None,
        };
        self
    }
}

fn scan_chunk<T: Scalar>(bytes: &[u8], with_histogram: bool) -> ChunkScan {
    let width = std::mem::size_of::<T>();
    bytes
        .par_chunks(width * 65536)
        .map(|sub| {
            let mut acc = ChunkScan::identity(with_histogram);
            for chunk in sub.chunks_exact(width) {
                let v = bytemuck::pod_read_unaligned::<T>(chunk).to_f64();
                if v < acc.min {
                    acc.min = v;
                }
                if v > acc.max {
                    acc.max = v;
                }
                if let Some(h) = &mut acc.histogram {
                    if v >= 0.0 && v < HISTOGRAM_BINS as f64 {
                        h[v as usize] += 1;
                    } else {
                        acc.histogram = None;
                    }
                }
            }
            acc
        })
        .reduce(|| ChunkScan::identity(with_histogram), ChunkScan::merge)
}

/// Scan the input once for its value range and 12-bit histogram.
pub fn scan(src: &mut RawFile, offset: u64, meta: &VolumeMeta) -> Result<ScanResult> {
    let vb = meta.voxel_bytes();
    let total = meta.total_bytes();
    let chunk_bytes = (SCAN_CHUNK / vb).max(1) * vb;
    let mut buf = vec![0u8; chunk_bytes];
    // Floats never keep their native representation.
    let mut acc = ChunkScan::identity(!meta.component_type.is_float());
    let mut pos = 0u64;
    while pos < total {
        let n = ((total - pos) as usize).min(chunk_bytes);
        src.read_exact_at(offset + pos, &mut buf[..n])?;
        let with_histogram = acc.histogram.is_some();
        let chunk = with_scalar_type!(meta.component_type, |T| scan_chunk::<T>(
            &buf[..n],
            with_histogram
        ));
        acc = acc.merge(chunk);
        pos += n as u64;
    }
    info!(
        min = acc.min,
        max = acc.max,
        fits_12bit = acc.histogram.is_some(),
        "input value scan complete"
    );
    Ok(ScanResult {
        min: acc.min,
        max: acc.max,
        histogram: acc.histogram,
    })
}

/// Rewrite the input linearly mapped to `[0, 255]` as `u8`.
///
/// Returns the metadata of the remapped volume at offset 0 of `dst_path`.
pub fn remap_to_u8(
    src: &mut RawFile,
    offset: u64,
    meta: &VolumeMeta,
    min: f64,
    max: f64,
    dst_path: &Path,
) -> Result<VolumeMeta> {
    let vb = meta.voxel_bytes();
    let width = meta.component_type.size_in_bytes();
    let total = meta.total_bytes();
    let chunk_bytes = (SCAN_CHUNK / vb).max(1) * vb;
    let scale = if max > min { 255.0 / (max - min) } else { 0.0 };

    let mut dst = RawFile::create(dst_path)?;
    let mut buf = vec![0u8; chunk_bytes];
    let mut out = Vec::with_capacity(chunk_bytes / width);
    let mut pos = 0u64;
    let mut written = 0u64;
    while pos < total {
        let n = ((total - pos) as usize).min(chunk_bytes);
        src.read_exact_at(offset + pos, &mut buf[..n])?;
        out.clear();
        with_scalar_type!(meta.component_type, |T| {
            for chunk in buf[..n].chunks_exact(std::mem::size_of::<T>()) {
                let v = bytemuck::pod_read_unaligned::<T>(chunk).to_f64();
                out.push(((v - min) * scale).round() as u8);
            }
        });
        dst.write_all_at(written, &out)?;
        written += out.len() as u64;
        pos += n as u64;
    }
    info!(
        path = %dst_path.display(),
        bytes = written,
        "input quantized to 8 bits"
    );
    VolumeMeta::new(
        meta.size,
        meta.aspect,
        voluma_core::ComponentType::U8,
        meta.component_count,
    )
}
