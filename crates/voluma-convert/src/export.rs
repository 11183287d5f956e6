//! Dense RAW export of a single LoD.

use tracing::debug;

use voluma_core::Result;
use voluma_store::{OctreeStore, RawFile};

/// Write one LoD as a dense x-fastest voxel stream at `target_offset`.
///
/// Only inner regions are written; the result is
/// `lod_volume(lod).product() * voxel_bytes` bytes, independent of brick
/// layout and overlap.
pub fn export_to_raw(
    store: &OctreeStore,
    lod: u32,
    target: &mut RawFile,
    target_offset: u64,
) -> Result<()> {
    let layout = store.layout();
    let meta = store.meta();
    let lv = layout.lod_volume(lod)?;
    let counts = layout.brick_count(lod)?;
    let o = layout.overlap() as usize;
    let vb = meta.voxel_bytes();
    debug!(lod, volume = %lv, "exporting LoD to raw");

    for bz in 0..counts.z {
        for by in 0..counts.y {
            for bx in 0..counts.x {
                let key = voluma_core::BrickKey::new(lod, bx, by, bz);
                let index = layout.linear_index(key)?;
                let ext = layout.brick_extent(key)?;
                let ie = layout.inner_extent(key)?;
                let origin = layout.inner_origin(key)?;
                let data = store.read_brick(index)?;
                for iz in 0..ie.z as usize {
                    for iy in 0..ie.y as usize {
                        let src =
                            (((iz + o) * ext.y as usize + iy + o) * ext.x as usize + o) * vb;
                        let n = ie.x as usize * vb;
                        let dst = target_offset
                            + ((origin.z + iz as u64) * lv.y + origin.y + iy as u64)
                                * lv.x
                                * vb as u64
                            + origin.x * vb as u64;
                        target.write_all_at(dst, &data[src..src + n])?;
                    }
                }
            }
        }
    }
    Ok(())
}
