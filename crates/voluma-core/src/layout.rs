//! Brick keys and the brick/LoD layout arithmetic.
//!
//! All functions here are pure arithmetic over the conversion-time
//! parameters (volume size, maximum brick size, overlap). The layout is
//! shared by the converter and the on-disk store and must agree between
//! them bit for bit.

use glam::{U64Vec3, UVec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a single brick: level of detail plus brick coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrickKey {
    /// Level of detail; 0 is native resolution.
    pub lod: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BrickKey {
    /// Create a new brick key.
    #[inline]
    pub const fn new(lod: u32, x: u32, y: u32, z: u32) -> Self {
        Self { lod, x, y, z }
    }
}

/// Per-LoD geometry, precomputed at layout construction.
#[derive(Clone, Copy, Debug)]
struct LodInfo {
    /// Voxel size of this level.
    volume: U64Vec3,
    /// Brick count per axis.
    bricks: UVec3,
    /// Linear index of this level's first brick.
    base_index: u64,
}

/// Brick layout derived from `(volume, max_brick, overlap)`.
///
/// A brick stores an inner region of up to `max_brick - 2 * overlap`
/// voxels per axis plus an overlap band on all six faces. Bricks at the
/// far edge of an axis shrink to the remaining inner size; the overlap
/// bands are always stored and are filled by replication where they fall
/// outside the volume.
#[derive(Clone, Debug)]
pub struct BrickLayout {
    volume: U64Vec3,
    max_brick: UVec3,
    overlap: u32,
    lods: Vec<LodInfo>,
}

#[inline]
fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

impl BrickLayout {
    /// Create a layout, validating `max_brick >= 2 * overlap + 1` per axis.
    pub fn new(volume: U64Vec3, max_brick: UVec3, overlap: u32) -> Result<Self> {
        if volume.x == 0 || volume.y == 0 || volume.z == 0 {
            return Err(Error::OutOfRange(format!(
                "volume size must be nonzero, got {volume}"
            )));
        }
        let min_brick = 2 * overlap + 1;
        if max_brick.x < min_brick || max_brick.y < min_brick || max_brick.z < min_brick {
            return Err(Error::OutOfRange(format!(
                "max brick size {max_brick} must be at least {min_brick} per axis \
                 for overlap {overlap}"
            )));
        }

        let inner = max_brick - UVec3::splat(2 * overlap);
        let mut lods = Vec::new();
        let mut lv = volume;
        let mut base = 0u64;
        loop {
            let bricks = U64Vec3::new(
                ceil_div(lv.x, u64::from(inner.x)),
                ceil_div(lv.y, u64::from(inner.y)),
                ceil_div(lv.z, u64::from(inner.z)),
            );
            if bricks.x > u64::from(u32::MAX)
                || bricks.y > u64::from(u32::MAX)
                || bricks.z > u64::from(u32::MAX)
            {
                return Err(Error::OutOfRange(format!(
                    "brick count {bricks} exceeds the addressable range"
                )));
            }
            let bricks = UVec3::new(bricks.x as u32, bricks.y as u32, bricks.z as u32);
            lods.push(LodInfo {
                volume: lv,
                bricks,
                base_index: base,
            });
            base += u64::from(bricks.x) * u64::from(bricks.y) * u64::from(bricks.z);
            if bricks == UVec3::ONE {
                break;
            }
            lv = U64Vec3::new(
                ceil_div(lv.x, 2).max(1),
                ceil_div(lv.y, 2).max(1),
                ceil_div(lv.z, 2).max(1),
            );
        }

        Ok(Self {
            volume,
            max_brick,
            overlap,
            lods,
        })
    }

    /// Native-resolution volume size.
    #[inline]
    pub fn volume(&self) -> U64Vec3 {
        self.volume
    }

    /// Maximum brick size including overlap.
    #[inline]
    pub fn max_brick(&self) -> UVec3 {
        self.max_brick
    }

    /// Overlap band width in voxels.
    #[inline]
    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Usable (inner) brick size per axis.
    #[inline]
    pub fn inner_brick(&self) -> UVec3 {
        self.max_brick - UVec3::splat(2 * self.overlap)
    }

    /// Number of LoD levels; the last level has a single brick.
    #[inline]
    pub fn lod_count(&self) -> u32 {
        self.lods.len() as u32
    }

    /// Total brick count over all levels.
    #[inline]
    pub fn total_bricks(&self) -> u64 {
        let last = self.lods.last().expect("layout has at least one level");
        last.base_index + 1
    }

    /// Voxel count of the largest possible brick.
    #[inline]
    pub fn max_brick_voxels(&self) -> u64 {
        u64::from(self.max_brick.x) * u64::from(self.max_brick.y) * u64::from(self.max_brick.z)
    }

    fn lod(&self, lod: u32) -> Result<&LodInfo> {
        self.lods.get(lod as usize).ok_or_else(|| {
            Error::OutOfRange(format!("lod {lod} past level count {}", self.lods.len()))
        })
    }

    /// Voxel size of a level.
    pub fn lod_volume(&self, lod: u32) -> Result<U64Vec3> {
        Ok(self.lod(lod)?.volume)
    }

    /// Brick count per axis at a level.
    pub fn brick_count(&self, lod: u32) -> Result<UVec3> {
        Ok(self.lod(lod)?.bricks)
    }

    /// Total brick count at a level.
    pub fn brick_count_linear(&self, lod: u32) -> Result<u64> {
        let b = self.lod(lod)?.bricks;
        Ok(u64::from(b.x) * u64::from(b.y) * u64::from(b.z))
    }

    fn check_key(&self, key: BrickKey) -> Result<&LodInfo> {
        let info = self.lod(key.lod)?;
        if key.x >= info.bricks.x || key.y >= info.bricks.y || key.z >= info.bricks.z {
            return Err(Error::OutOfRange(format!(
                "brick ({}, {}, {}) past count {} at lod {}",
                key.x, key.y, key.z, info.bricks, key.lod
            )));
        }
        Ok(info)
    }

    /// Stored extent of a brick including overlap.
    ///
    /// Full-size except at the far edge of an axis, where the inner region
    /// shrinks to the remaining voxels.
    pub fn brick_extent(&self, key: BrickKey) -> Result<UVec3> {
        let info = self.check_key(key)?;
        let inner = self.inner_brick();
        let o = 2 * self.overlap;
        let axis = |v: u64, inner: u32, count: u32, coord: u32, max: u32| -> u32 {
            if coord + 1 < count {
                max
            } else {
                o + (v - u64::from(coord) * u64::from(inner)) as u32
            }
        };
        Ok(UVec3::new(
            axis(info.volume.x, inner.x, info.bricks.x, key.x, self.max_brick.x),
            axis(info.volume.y, inner.y, info.bricks.y, key.y, self.max_brick.y),
            axis(info.volume.z, inner.z, info.bricks.z, key.z, self.max_brick.z),
        ))
    }

    /// Inner extent of a brick (stored extent minus the overlap bands).
    pub fn inner_extent(&self, key: BrickKey) -> Result<UVec3> {
        Ok(self.brick_extent(key)? - UVec3::splat(2 * self.overlap))
    }

    /// Position of the brick's first inner voxel in LoD voxel space.
    pub fn inner_origin(&self, key: BrickKey) -> Result<U64Vec3> {
        self.check_key(key)?;
        let inner = self.inner_brick();
        Ok(U64Vec3::new(
            u64::from(key.x) * u64::from(inner.x),
            u64::from(key.y) * u64::from(inner.y),
            u64::from(key.z) * u64::from(inner.z),
        ))
    }

    /// Stored voxel count of a brick.
    pub fn brick_voxels(&self, key: BrickKey) -> Result<u64> {
        let e = self.brick_extent(key)?;
        Ok(u64::from(e.x) * u64::from(e.y) * u64::from(e.z))
    }

    /// Map a key to its 1D brick index.
    pub fn linear_index(&self, key: BrickKey) -> Result<u64> {
        let info = self.check_key(key)?;
        let cx = u64::from(info.bricks.x);
        let cy = u64::from(info.bricks.y);
        Ok(info.base_index + (u64::from(key.z) * cy + u64::from(key.y)) * cx + u64::from(key.x))
    }

    /// Map a 1D brick index back to its key.
    pub fn key_from_index(&self, index: u64) -> Result<BrickKey> {
        for (lod, info) in self.lods.iter().enumerate() {
            let count = u64::from(info.bricks.x) * u64::from(info.bricks.y) * u64::from(info.bricks.z);
            if index < info.base_index + count {
                let local = index - info.base_index;
                let cx = u64::from(info.bricks.x);
                let cy = u64::from(info.bricks.y);
                return Ok(BrickKey::new(
                    lod as u32,
                    (local % cx) as u32,
                    ((local / cx) % cy) as u32,
                    (local / (cx * cy)) as u32,
                ));
            }
        }
        Err(Error::OutOfRange(format!(
            "brick index {index} past total count {}",
            self.total_bricks()
        )))
    }

    /// The bricks at `lod - 1` covering this brick's inner region.
    ///
    /// Up to eight keys; fewer at far edges. Empty for LoD 0.
    pub fn child_keys(&self, key: BrickKey) -> Result<Vec<BrickKey>> {
        self.check_key(key)?;
        if key.lod == 0 {
            return Ok(Vec::new());
        }
        let child_lod = key.lod - 1;
        let count = self.brick_count(child_lod)?;
        let mut keys = Vec::with_capacity(8);
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let c = UVec3::new(2 * key.x + dx, 2 * key.y + dy, 2 * key.z + dz);
                    if c.x < count.x && c.y < count.y && c.z < count.z {
                        keys.push(BrickKey::new(child_lod, c.x, c.y, c.z));
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(v: (u64, u64, u64), b: (u32, u32, u32), o: u32) -> BrickLayout {
        BrickLayout::new(U64Vec3::new(v.0, v.1, v.2), UVec3::new(b.0, b.1, b.2), o).unwrap()
    }

    #[test]
    fn rejects_brick_smaller_than_overlap() {
        assert!(BrickLayout::new(U64Vec3::splat(8), UVec3::new(4, 1, 1), 1).is_err());
        assert!(BrickLayout::new(U64Vec3::ZERO, UVec3::splat(4), 0).is_err());
    }

    #[test]
    fn single_brick_volume_has_one_level() {
        let l = layout((4, 4, 4), (4, 4, 4), 0);
        assert_eq!(l.lod_count(), 1);
        assert_eq!(l.total_bricks(), 1);
        assert_eq!(l.brick_extent(BrickKey::new(0, 0, 0, 0)).unwrap(), UVec3::splat(4));
    }

    #[test]
    fn lod_chain_ends_at_single_brick() {
        // 8^3 volume, usable brick 2^3: LoD0 4x4x4 bricks, LoD1 2x2x2, LoD2 1.
        let l = layout((8, 8, 8), (4, 4, 4), 1);
        assert_eq!(l.lod_count(), 3);
        assert_eq!(l.brick_count(0).unwrap(), UVec3::splat(4));
        assert_eq!(l.brick_count(1).unwrap(), UVec3::splat(2));
        assert_eq!(l.brick_count(2).unwrap(), UVec3::ONE);
        assert_eq!(l.lod_volume(1).unwrap(), U64Vec3::splat(4));
        assert_eq!(l.lod_volume(2).unwrap(), U64Vec3::splat(2));
        assert_eq!(l.total_bricks(), 64 + 8 + 1);
    }

    #[test]
    fn far_edge_bricks_shrink() {
        // 5 voxels, usable 2 per brick: bricks cover 2, 2, 1 inner voxels.
        let l = layout((5, 1, 1), (4, 3, 3), 1);
        assert_eq!(l.brick_count(0).unwrap(), UVec3::new(3, 1, 1));
        assert_eq!(l.brick_extent(BrickKey::new(0, 0, 0, 0)).unwrap(), UVec3::new(4, 3, 3));
        assert_eq!(l.brick_extent(BrickKey::new(0, 1, 0, 0)).unwrap(), UVec3::new(4, 3, 3));
        assert_eq!(l.brick_extent(BrickKey::new(0, 2, 0, 0)).unwrap(), UVec3::new(3, 3, 3));
        assert_eq!(l.inner_extent(BrickKey::new(0, 2, 0, 0)).unwrap(), UVec3::new(1, 1, 1));
        assert_eq!(
            l.inner_origin(BrickKey::new(0, 2, 0, 0)).unwrap(),
            U64Vec3::new(4, 0, 0)
        );
    }

    #[test]
    fn linear_index_roundtrip() {
        let l = layout((9, 7, 5), (4, 4, 4), 1);
        let mut expect = 0u64;
        for lod in 0..l.lod_count() {
            let count = l.brick_count(lod).unwrap();
            for z in 0..count.z {
                for y in 0..count.y {
                    for x in 0..count.x {
                        let key = BrickKey::new(lod, x, y, z);
                        let index = l.linear_index(key).unwrap();
                        assert_eq!(index, expect);
                        assert_eq!(l.key_from_index(index).unwrap(), key);
                        expect += 1;
                    }
                }
            }
        }
        assert_eq!(expect, l.total_bricks());
        assert!(l.key_from_index(expect).is_err());
    }

    #[test]
    fn out_of_range_keys_rejected() {
        let l = layout((8, 8, 8), (4, 4, 4), 1);
        assert!(l.linear_index(BrickKey::new(0, 4, 0, 0)).is_err());
        assert!(l.linear_index(BrickKey::new(3, 0, 0, 0)).is_err());
        assert!(l.brick_extent(BrickKey::new(1, 2, 0, 0)).is_err());
    }

    #[test]
    fn child_keys_cover_parent() {
        let l = layout((8, 8, 8), (4, 4, 4), 1);
        let children = l.child_keys(BrickKey::new(1, 0, 0, 0)).unwrap();
        assert_eq!(children.len(), 8);
        assert!(children.iter().all(|k| k.lod == 0 && k.x < 2 && k.y < 2 && k.z < 2));
        assert!(l.child_keys(BrickKey::new(0, 0, 0, 0)).unwrap().is_empty());
    }

    #[test]
    fn child_keys_clip_at_odd_boundary() {
        // LoD1 of a 5-voxel axis is 3 voxels; its last brick has children
        // clipped to the 3-brick count of LoD0.
        let l = layout((5, 1, 1), (4, 3, 3), 1);
        assert_eq!(l.lod_count(), 3);
        assert_eq!(l.brick_count(1).unwrap(), UVec3::new(2, 1, 1));
        let children = l.child_keys(BrickKey::new(1, 1, 0, 0)).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], BrickKey::new(0, 2, 0, 0));
    }
}
