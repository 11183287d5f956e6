//! Overlap fill: copying inner voxels into neighboring overlap bands.
//!
//! Every stored voxel of a brick is defined by one rule: local position
//! `p` holds the LoD-space inner voxel at `clamp(origin - overlap + p)`.
//! The inner region already satisfies this after permutation or
//! downsampling; this pass completes the overlap shell, which both copies
//! from face/edge/corner neighbors and replicates at volume boundaries.

use voluma_core::{BrickKey, BrickLayout, Result};
use voluma_store::OctreeBuilder;

use crate::cache::BrickCache;

#[inline]
fn clamp_axis(g: i64, size: u64) -> u64 {
    g.clamp(0, size as i64 - 1) as u64
}

/// Fill the overlap shell of one brick through the cache.
///
/// All reads touch only inner voxels of neighbor bricks (or of the brick
/// itself at volume boundaries), so the pass may run in any brick order
/// once the LoD's inner regions are complete.
pub(crate) fn fill_brick_overlap(
    cache: &mut BrickCache,
    store: &mut OctreeBuilder,
    layout: &BrickLayout,
    voxel_bytes: usize,
    key: BrickKey,
) -> Result<()> {
    let o = layout.overlap() as usize;
    if o == 0 {
        return Ok(());
    }
    let index = layout.linear_index(key)?;
    let ext = layout.brick_extent(key)?;
    let ie = layout.inner_extent(key)?;
    let origin = layout.inner_origin(key)?;
    let lv = layout.lod_volume(key.lod)?;

    let (ex, ey) = (ext.x as usize, ext.y as usize);
    let mut row = vec![0u8; ex * voxel_bytes];

    for pz in 0..ext.z as usize {
        let z_inner = pz >= o && pz < o + ie.z as usize;
        let gz = clamp_axis(origin.z as i64 + pz as i64 - o as i64, lv.z);
        for py in 0..ey {
            let y_inner = py >= o && py < o + ie.y as usize;
            let gy = clamp_axis(origin.y as i64 + py as i64 - o as i64, lv.y);
            // Fully inner rows only need their x-side caps.
            let segments: [(usize, usize); 2] = if z_inner && y_inner {
                [(0, o), (o + ie.x as usize, ex)]
            } else {
                [(0, ex), (0, 0)]
            };
            for (x0, x1) in segments {
                if x0 == x1 {
                    continue;
                }
                let gx_start = origin.x as i64 + x0 as i64 - o as i64;
                gather_row(
                    cache,
                    store,
                    layout,
                    voxel_bytes,
                    key.lod,
                    gy,
                    gz,
                    gx_start,
                    x1 - x0,
                    &mut row[x0 * voxel_bytes..x1 * voxel_bytes],
                )?;
                let data = cache.get_mut(store, index)?;
                let dst = ((pz * ey + py) * ex + x0) * voxel_bytes;
                data[dst..dst + (x1 - x0) * voxel_bytes]
                    .copy_from_slice(&row[x0 * voxel_bytes..x1 * voxel_bytes]);
            }
        }
    }
    Ok(())
}

/// Assemble one x-run of LoD-space inner voxels at `(gy, gz)` into `out`,
/// clamping out-of-volume positions to the nearest boundary voxel.
#[allow(clippy::too_many_arguments)]
fn gather_row(
    cache: &mut BrickCache,
    store: &mut OctreeBuilder,
    layout: &BrickLayout,
    voxel_bytes: usize,
    lod: u32,
    gy: u64,
    gz: u64,
    gx_start: i64,
    len: usize,
    out: &mut [u8],
) -> Result<()> {
    debug_assert_eq!(out.len(), len * voxel_bytes);
    let lv = layout.lod_volume(lod)?;
    let inner = layout.inner_brick();
    let o = layout.overlap() as usize;
    let oy = (gy / u64::from(inner.y)) as u32;
    let oz = (gz / u64::from(inner.z)) as u32;

    // Split the run into a left clamp zone, a monotone middle, and a
    // right clamp zone.
    let left = ((-gx_start).max(0) as usize).min(len);
    let first_right = ((lv.x as i64 - gx_start).max(0) as usize).min(len);

    if left >= first_right {
        // The whole run clamps to one boundary voxel.
        let gx = clamp_axis(gx_start, lv.x);
        copy_run(
            cache, store, layout, voxel_bytes, lod, gx, gy, gz, oy, oz, o, 1,
            &mut out[..voxel_bytes],
        )?;
        for i in 1..len {
            out.copy_within(0..voxel_bytes, i * voxel_bytes);
        }
        return Ok(());
    }

    let mut i = left;
    while i < first_right {
        let gx = (gx_start + i as i64) as u64;
        let ox = (gx / u64::from(inner.x)) as u32;
        let src_key = BrickKey::new(lod, ox, oy, oz);
        let s_ie = layout.inner_extent(src_key)?;
        let s_origin = layout.inner_origin(src_key)?;
        let run_end = (s_origin.x + u64::from(s_ie.x)).min((gx_start + first_right as i64) as u64);
        let run = (run_end - gx) as usize;
        copy_run(
            cache,
            store,
            layout,
            voxel_bytes,
            lod,
            gx,
            gy,
            gz,
            oy,
            oz,
            o,
            run,
            &mut out[i * voxel_bytes..(i + run) * voxel_bytes],
        )?;
        i += run;
    }

    // Replicate into the clamp zones.
    for j in (0..left).rev() {
        out.copy_within(left * voxel_bytes..(left + 1) * voxel_bytes, j * voxel_bytes);
    }
    for j in first_right..len {
        out.copy_within(
            (first_right - 1) * voxel_bytes..first_right * voxel_bytes,
            j * voxel_bytes,
        );
    }
    Ok(())
}

/// Copy `run` contiguous inner voxels starting at `(gx, gy, gz)` out of
/// their owning brick.
#[allow(clippy::too_many_arguments)]
fn copy_run(
    cache: &mut BrickCache,
    store: &mut OctreeBuilder,
    layout: &BrickLayout,
    voxel_bytes: usize,
    lod: u32,
    gx: u64,
    gy: u64,
    gz: u64,
    oy: u32,
    oz: u32,
    o: usize,
    run: usize,
    out: &mut [u8],
) -> Result<()> {
    let inner = layout.inner_brick();
    let ox = (gx / u64::from(inner.x)) as u32;
    let src_key = BrickKey::new(lod, ox, oy, oz);
    let se = layout.brick_extent(src_key)?;
    let s_origin = layout.inner_origin(src_key)?;
    let sx = (gx - s_origin.x) as usize + o;
    let sy = (gy - s_origin.y) as usize + o;
    let sz = (gz - s_origin.z) as usize + o;
    let src_index = layout.linear_index(src_key)?;
    let data = cache.get(store, src_index)?;
    let src = ((sz * se.y as usize + sy) * se.x as usize + sx) * voxel_bytes;
    out.copy_from_slice(&data[src..src + run * voxel_bytes]);
    Ok(())
}
