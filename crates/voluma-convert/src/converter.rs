//! The conversion pipeline driver.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use voluma_codec::Codec;
use voluma_core::{with_scalar_type, BrickKey, BrickLayout, Error, Result, VolumeMeta};
use voluma_store::container::encode_key_values;
use voluma_store::stats::accumulate_min_max;
use voluma_store::{BlockType, BrickStats, ContainerWriter, OctreeBuilder, RawFile, StatsBlock};

use crate::cache::BrickCache;
use crate::config::ConvertConfig;
use crate::progress::{CancelToken, Progress, ProgressTracker};
use crate::{downsample, overlap, quantize};

/// What a successful conversion produced.
#[derive(Clone, Debug)]
pub struct ConvertSummary {
    /// Path of the finished container file.
    pub output: PathBuf,
    /// Number of LoD levels in the octree.
    pub lod_count: u32,
    /// Total brick count over all levels.
    pub total_bricks: u64,
    /// Whether the input was remapped to 8 bits.
    pub quantized: bool,
    /// 12-bit histogram of the input, when it kept its native type.
    pub histogram: Option<Vec<u64>>,
}

/// Removes registered files on drop; a successful run releases the
/// output and deletes only the temporaries.
struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn add(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
    }

    /// Delete every registered temporary except `keep` and disarm.
    fn finish(&mut self, keep: &Path) {
        for path in self.paths.drain(..) {
            if path != keep {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Drives the full conversion of a raw linear volume into a container.
///
/// The converter owns the brick cache for the duration of a run and is
/// the sole writer of the output; [`Converter::progress`] and
/// [`Converter::cancel_token`] hand out thread-safe observer handles.
pub struct Converter {
    config: ConvertConfig,
    progress: Progress,
    cancel: CancelToken,
}

impl Converter {
    /// Create a converter with the given configuration.
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config,
            progress: Progress::new(),
            cancel: CancelToken::new(),
        }
    }

    /// The conversion configuration.
    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Handle for polling progress from another thread.
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Handle for requesting cancellation from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Convert raw voxel data at `input_offset` of `input_path` into a
    /// container at `output_path`.
    ///
    /// On any error, including cancellation, the partially written output
    /// and all temporaries are deleted.
    pub fn convert(
        &self,
        input_path: &Path,
        input_offset: u64,
        meta: VolumeMeta,
        output_path: &Path,
    ) -> Result<ConvertSummary> {
        self.progress.reset();
        let mut guard = CleanupGuard::new();

        let mut input = RawFile::open(input_path)?;
        let needed = input_offset + meta.total_bytes();
        let have = input.size()?;
        if have < needed {
            return Err(Error::Format(format!(
                "input file holds {have} bytes, volume needs {needed}"
            )));
        }
        info!(
            volume = %meta.size,
            component_type = ?meta.component_type,
            components = meta.component_count,
            "starting conversion"
        );

        // Optional quantization pre-pass.
        let mut meta = meta;
        let mut input_offset = input_offset;
        let mut quantized = false;
        let mut histogram = None;
        if self.config.quantize_to_u8 {
            let scan = quantize::scan(&mut input, input_offset, &meta)?;
            self.cancel.check()?;
            match scan.histogram {
                Some(h) => histogram = Some(h),
                None => {
                    let quant_path = output_path.with_extension("quant.tmp");
                    guard.add(&quant_path);
                    meta = quantize::remap_to_u8(
                        &mut input,
                        input_offset,
                        &meta,
                        scan.min,
                        scan.max,
                        &quant_path,
                    )?;
                    input = RawFile::open(&quant_path)?;
                    input_offset = 0;
                    quantized = true;
                }
            }
        }

        let layout = BrickLayout::new(meta.size, self.config.max_brick_size, self.config.overlap)?;
        let octree_path = output_path.with_extension("octree.tmp");
        guard.add(&octree_path);
        let mut builder =
            OctreeBuilder::create(&octree_path, meta, layout.clone(), self.config.endian)?;
        let slot_bytes = layout.max_brick_voxels() as usize * meta.voxel_bytes();
        let mut cache = BrickCache::new(self.config.cache_bytes, slot_bytes);
        let mut stats = self
            .config
            .stats
            .then(|| StatsBlock::new(layout.total_bricks(), meta.component_count));

        // One unit per brick per pass; the permutation credits fractions
        // as rows stream in.
        let mut total_units = layout.brick_count_linear(0)? as f64;
        for lod in 0..layout.lod_count() {
            total_units += layout.brick_count_linear(lod)? as f64;
            if lod > 0 {
                total_units += layout.brick_count_linear(lod)? as f64;
            }
        }
        if self.config.codec != Codec::Identity {
            total_units += layout.total_bricks() as f64;
        }
        let mut tracker = ProgressTracker::new(self.progress.clone(), total_units);

        self.permute(
            &mut input,
            input_offset,
            &meta,
            &layout,
            &mut cache,
            &mut builder,
            &mut tracker,
        )?;

        for lod in 0..layout.lod_count() {
            let counts = layout.brick_count(lod)?;
            if lod > 0 {
                debug!(lod, "downsampling");
                for bz in 0..counts.z {
                    for by in 0..counts.y {
                        for bx in 0..counts.x {
                            self.cancel.check()?;
                            let key = BrickKey::new(lod, bx, by, bz);
                            downsample::downsample_brick(
                                &mut cache,
                                &mut builder,
                                &layout,
                                &meta,
                                key,
                            )?;
                            tracker.tick(1.0);
                        }
                    }
                }
            }
            debug!(lod, "overlap fill and statistics");
            for bz in 0..counts.z {
                for by in 0..counts.y {
                    for bx in 0..counts.x {
                        self.cancel.check()?;
                        let key = BrickKey::new(lod, bx, by, bz);
                        overlap::fill_brick_overlap(
                            &mut cache,
                            &mut builder,
                            &layout,
                            meta.voxel_bytes(),
                            key,
                        )?;
                        if let Some(stats) = stats.as_mut() {
                            let index = layout.linear_index(key)?;
                            let ranges =
                                brick_inner_stats(&mut cache, &mut builder, &layout, &meta, key)?;
                            stats.set(index, &ranges)?;
                        }
                        tracker.tick(1.0);
                    }
                }
            }
            cache.flush_all(&mut builder)?;
        }

        if self.config.codec != Codec::Identity {
            debug!("compressing brick payloads");
            let cancel = &self.cancel;
            let tracker_ref = &mut tracker;
            builder.compress_payload(self.config.codec, |_| {
                cancel.check()?;
                tracker_ref.tick(1.0);
                Ok(())
            })?;
        }
        let octree_size = builder.finalize()?;

        // Assemble the container around the finished octree.
        guard.add(output_path);
        let mut writer =
            ContainerWriter::create(output_path, self.config.endian, self.config.checksum)?;
        let mut octree_file = RawFile::open(&octree_path)?;
        writer.add_block_from_file(BlockType::RasterToc.tag(), &mut octree_file, 0, octree_size)?;
        drop(octree_file);
        if let Some(stats) = &stats {
            writer.add_block_bytes(
                BlockType::Statistics.tag(),
                &stats.encode(self.config.endian),
            )?;
        }
        let pairs = vec![
            ("source-file".to_owned(), input_path.display().to_string()),
            (
                "volume-size".to_owned(),
                format!("{}x{}x{}", meta.size.x, meta.size.y, meta.size.z),
            ),
            (
                "component-type".to_owned(),
                format!("{:?}", meta.component_type),
            ),
            (
                "component-count".to_owned(),
                meta.component_count.to_string(),
            ),
            (
                "max-brick-size".to_owned(),
                format!(
                    "{}x{}x{}",
                    self.config.max_brick_size.x,
                    self.config.max_brick_size.y,
                    self.config.max_brick_size.z
                ),
            ),
            ("overlap".to_owned(), self.config.overlap.to_string()),
            ("quantized".to_owned(), quantized.to_string()),
        ];
        writer.add_block_bytes(
            BlockType::KeyValue.tag(),
            &encode_key_values(&pairs, self.config.endian),
        )?;
        writer.finish()?;

        guard.finish(output_path);
        tracker.finish();
        info!(
            output = %output_path.display(),
            lods = layout.lod_count(),
            bricks = layout.total_bricks(),
            "conversion complete"
        );
        Ok(ConvertSummary {
            output: output_path.to_path_buf(),
            lod_count: layout.lod_count(),
            total_bricks: layout.total_bricks(),
            quantized,
            histogram,
        })
    }

    /// Stream the linear input and scatter it into LoD-0 brick interiors.
    ///
    /// Reads one `(z, brick-row)` sub-slab at a time, which keeps input
    /// I/O strictly sequential while the cache absorbs the scattered
    /// brick writes.
    #[allow(clippy::too_many_arguments)]
    fn permute(
        &self,
        src: &mut RawFile,
        src_offset: u64,
        meta: &VolumeMeta,
        layout: &BrickLayout,
        cache: &mut BrickCache,
        builder: &mut OctreeBuilder,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        let v = layout.lod_volume(0)?;
        let counts = layout.brick_count(0)?;
        let inner = layout.inner_brick();
        let vb = meta.voxel_bytes();
        let o = layout.overlap() as usize;
        debug!("permuting input into LoD 0 bricks");

        let mut slab = Vec::new();
        for z in 0..v.z {
            let bz = (z / u64::from(inner.z)) as u32;
            let brick_rows = (v.z - u64::from(bz) * u64::from(inner.z)).min(u64::from(inner.z));
            let lz = o + (z - u64::from(bz) * u64::from(inner.z)) as usize;
            for by in 0..counts.y {
                self.cancel.check()?;
                let y0 = u64::from(by) * u64::from(inner.y);
                let rows = (v.y - y0).min(u64::from(inner.y));
                slab.resize((rows * v.x) as usize * vb, 0);
                let offset = src_offset + (z * v.y + y0) * v.x * vb as u64;
                src.read_exact_at(offset, &mut slab)?;
                for bx in 0..counts.x {
                    let key = BrickKey::new(0, bx, by, bz);
                    let index = layout.linear_index(key)?;
                    let ext = layout.brick_extent(key)?;
                    let ie = layout.inner_extent(key)?;
                    let x0 = u64::from(bx) * u64::from(inner.x);
                    let data = cache.get_mut(builder, index)?;
                    for ry in 0..rows as usize {
                        let src_start = (ry as u64 * v.x + x0) as usize * vb;
                        let dst =
                            ((lz * ext.y as usize + o + ry) * ext.x as usize + o) * vb;
                        let n = ie.x as usize * vb;
                        data[dst..dst + n].copy_from_slice(&slab[src_start..src_start + n]);
                    }
                }
                tracker.tick(f64::from(counts.x) / brick_rows as f64);
            }
        }
        Ok(())
    }
}

/// Per-component value ranges over a brick's inner region.
fn brick_inner_stats(
    cache: &mut BrickCache,
    builder: &mut OctreeBuilder,
    layout: &BrickLayout,
    meta: &VolumeMeta,
    key: BrickKey,
) -> Result<Vec<BrickStats>> {
    let index = layout.linear_index(key)?;
    let ext = layout.brick_extent(key)?;
    let ie = layout.inner_extent(key)?;
    let o = layout.overlap() as usize;
    let vb = meta.voxel_bytes();
    let data = cache.get(builder, index)?;
    let mut acc = vec![BrickStats::EMPTY; meta.component_count as usize];
    for iz in 0..ie.z as usize {
        for iy in 0..ie.y as usize {
            let off = (((iz + o) * ext.y as usize + iy + o) * ext.x as usize + o) * vb;
            let len = ie.x as usize * vb;
            with_scalar_type!(meta.component_type, |T| accumulate_min_max::<T>(
                &mut acc,
                &data[off..off + len]
            ));
        }
    }
    Ok(acc)
}
