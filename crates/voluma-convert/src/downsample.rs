//! Downsampling one brick from its children at the finer level.
//!
//! Every inner voxel at LoD `k` is the mean of its up-to-eight child
//! voxels at LoD `k - 1`; children past an odd-size boundary are simply
//! absent, so boundary voxels average 4, 2, or 1 inputs instead. The mean
//! accumulates in `f64` and converts back with the truncating scalar
//! conversion, so value distributions near borders stay unbiased.

use bytemuck::Zeroable;
use glam::{U64Vec3, UVec3};

use voluma_core::{with_scalar_type, BrickKey, BrickLayout, Result, Scalar, VolumeMeta};
use voluma_store::OctreeBuilder;

use crate::cache::BrickCache;

/// A child brick copied out of the cache for sampling.
struct Child {
    extent: UVec3,
    origin: U64Vec3,
    data: Vec<u8>,
}

/// Reinterpret a raw payload as scalars, tolerating unaligned buffers.
fn bytes_to_typed<T: Scalar>(bytes: &[u8]) -> Vec<T> {
    let mut typed = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut typed).copy_from_slice(bytes);
    typed
}

/// Downsample one brick at `key.lod >= 1` from its children.
///
/// Fills the target's inner region through the cache; the overlap shell
/// is completed by the subsequent overlap-fill pass.
pub(crate) fn downsample_brick(
    cache: &mut BrickCache,
    store: &mut OctreeBuilder,
    layout: &BrickLayout,
    meta: &VolumeMeta,
    key: BrickKey,
) -> Result<()> {
    debug_assert!(key.lod >= 1);
    let index = layout.linear_index(key)?;
    let ext = layout.brick_extent(key)?;
    let ie = layout.inner_extent(key)?;
    let origin = layout.inner_origin(key)?;
    let child_lv = layout.lod_volume(key.lod - 1)?;
    let inner = layout.inner_brick();
    let o = layout.overlap() as usize;
    let cc = meta.component_count as usize;
    let vb = meta.voxel_bytes();

    // Copy the children out of the cache so the borrows cannot collide
    // with the target access below. A brick has at most eight children.
    let mut children = Vec::with_capacity(8);
    let mut child_map = [None::<usize>; 8];
    for ck in layout.child_keys(key)? {
        let ci = layout.linear_index(ck)?;
        let data = cache.get(store, ci)?.to_vec();
        let rel =
            ((ck.z - 2 * key.z) * 4 + (ck.y - 2 * key.y) * 2 + (ck.x - 2 * key.x)) as usize;
        child_map[rel] = Some(children.len());
        children.push(Child {
            extent: layout.brick_extent(ck)?,
            origin: layout.inner_origin(ck)?,
            data,
        });
    }

    let inner_voxels = (u64::from(ie.x) * u64::from(ie.y) * u64::from(ie.z)) as usize;
    with_scalar_type!(meta.component_type, |T| {
        let typed: Vec<Vec<T>> = children.iter().map(|c| bytes_to_typed(&c.data)).collect();
        let mut target = vec![T::zeroed(); inner_voxels * cc];
        let mut acc = vec![0f64; cc];

        for tz in 0..u64::from(ie.z) {
            for ty in 0..u64::from(ie.y) {
                for tx in 0..u64::from(ie.x) {
                    let g = U64Vec3::new(origin.x + tx, origin.y + ty, origin.z + tz);
                    acc.fill(0.0);
                    let mut samples = 0u32;
                    for dz in 0..2u64 {
                        for dy in 0..2u64 {
                            for dx in 0..2u64 {
                                let s =
                                    U64Vec3::new(2 * g.x + dx, 2 * g.y + dy, 2 * g.z + dz);
                                if s.x >= child_lv.x || s.y >= child_lv.y || s.z >= child_lv.z
                                {
                                    continue;
                                }
                                let ox = (s.x / u64::from(inner.x)) as u32;
                                let oy = (s.y / u64::from(inner.y)) as u32;
                                let oz = (s.z / u64::from(inner.z)) as u32;
                                let rel = ((oz - 2 * key.z) * 4
                                    + (oy - 2 * key.y) * 2
                                    + (ox - 2 * key.x))
                                    as usize;
                                let c = child_map[rel]
                                    .expect("sample lies in a fetched child brick");
                                let child = &children[c];
                                let lx = (s.x - child.origin.x) as usize + o;
                                let ly = (s.y - child.origin.y) as usize + o;
                                let lz = (s.z - child.origin.z) as usize + o;
                                let base = ((lz * child.extent.y as usize + ly)
                                    * child.extent.x as usize
                                    + lx)
                                    * cc;
                                for (comp, a) in acc.iter_mut().enumerate() {
                                    *a += typed[c][base + comp].to_f64();
                                }
                                samples += 1;
                            }
                        }
                    }
                    let out = ((tz * u64::from(ie.y) + ty) * u64::from(ie.x) + tx) as usize * cc;
                    for (comp, a) in acc.iter().enumerate() {
                        target[out + comp] = T::from_f64(a / f64::from(samples));
                    }
                }
            }
        }

        // Scatter the inner region into the target brick row by row.
        let inner_bytes: &[u8] = bytemuck::cast_slice(&target);
        let data = cache.get_mut(store, index)?;
        let row = ie.x as usize * vb;
        for iz in 0..ie.z as usize {
            for iy in 0..ie.y as usize {
                let src = (iz * ie.y as usize + iy) * row;
                let dst = (((iz + o) * ext.y as usize + (iy + o)) * ext.x as usize + o) * vb;
                data[dst..dst + row].copy_from_slice(&inner_bytes[src..src + row]);
            }
        }
    });
    Ok(())
}
