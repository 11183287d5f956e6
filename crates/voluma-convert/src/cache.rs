//! Write-back brick cache used during conversion.
//!
//! The cache owns a bounded set of slots, each large enough for the
//! biggest raw brick. The store is passed into every operation as a
//! borrowed parameter; the cache never holds a reference to it. Returned
//! slices are invalidated by the next cache operation, so callers copy
//! what they need to keep.

use voluma_core::{Error, Result};
use voluma_store::OctreeBuilder;

const EMPTY: u64 = u64::MAX;

/// One cache slot; `data` is allocated lazily on first use.
struct CacheSlot {
    data: Option<Vec<u8>>,
    /// Brick index resident in this slot, or [`EMPTY`].
    index: u64,
    /// Valid byte count of the resident brick.
    len: usize,
    dirty: bool,
    last_access: u64,
}

impl CacheSlot {
    const fn unused() -> Self {
        Self {
            data: None,
            index: EMPTY,
            len: 0,
            dirty: false,
            last_access: 0,
        }
    }
}

/// Bounded-RAM write-back cache of decoded bricks.
pub struct BrickCache {
    slots: Vec<CacheSlot>,
    /// Monotone access counter driving eviction.
    counter: u64,
    /// Capacity of one slot: the largest raw brick size.
    slot_bytes: usize,
}

impl BrickCache {
    /// Create a cache with a byte budget; at least one slot always fits.
    pub fn new(cache_bytes: u64, slot_bytes: usize) -> Self {
        let count = (cache_bytes / slot_bytes.max(1) as u64).max(1) as usize;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(CacheSlot::unused());
        }
        Self {
            slots,
            counter: 0,
            slot_bytes,
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn bump(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn find(&self, index: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.index == index)
    }

    /// Pick the victim slot: the least-recently used clean slot, or, when
    /// every slot is dirty, the least-recently used dirty slot after
    /// flushing it. Ties break toward the lower slot number.
    fn evict_slot(&mut self, store: &mut OctreeBuilder) -> Result<usize> {
        let mut best_clean: Option<(u64, usize)> = None;
        let mut best_dirty: Option<(u64, usize)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let candidate = (slot.last_access, i);
            let best = if slot.dirty {
                &mut best_dirty
            } else {
                &mut best_clean
            };
            if best.map_or(true, |(access, _)| candidate.0 < access) {
                *best = Some(candidate);
            }
        }
        if let Some((_, i)) = best_clean {
            return Ok(i);
        }
        let (_, i) = best_dirty.expect("cache has at least one slot");
        self.flush_slot(store, i)?;
        Ok(i)
    }

    fn flush_slot(&mut self, store: &mut OctreeBuilder, slot: usize) -> Result<()> {
        let s = &mut self.slots[slot];
        if s.dirty {
            let data = s.data.as_ref().expect("dirty slot holds data");
            store.write_brick(s.index, &data[..s.len])?;
            s.dirty = false;
        }
        Ok(())
    }

    /// Make `index` resident and return its slot number.
    fn ensure_resident(&mut self, store: &mut OctreeBuilder, index: u64) -> Result<usize> {
        if let Some(slot) = self.find(index) {
            let access = self.bump();
            self.slots[slot].last_access = access;
            return Ok(slot);
        }
        let len = store.brick_len(index)?;
        if len > self.slot_bytes {
            return Err(Error::OutOfRange(format!(
                "brick {index} of {len} bytes exceeds the {}-byte cache slot",
                self.slot_bytes
            )));
        }
        let slot = self.evict_slot(store)?;
        let access = self.bump();
        let slot_bytes = self.slot_bytes;
        let s = &mut self.slots[slot];
        let data = s.data.get_or_insert_with(|| vec![0u8; slot_bytes]);
        store.read_brick(index, &mut data[..len])?;
        s.index = index;
        s.len = len;
        s.dirty = false;
        s.last_access = access;
        Ok(slot)
    }

    /// Read access to a brick, loading it on a miss.
    pub fn get(&mut self, store: &mut OctreeBuilder, index: u64) -> Result<&[u8]> {
        let slot = self.ensure_resident(store, index)?;
        let s = &self.slots[slot];
        Ok(&s.data.as_ref().expect("resident slot holds data")[..s.len])
    }

    /// Write access to a brick, loading it on a miss and marking it dirty.
    pub fn get_mut(&mut self, store: &mut OctreeBuilder, index: u64) -> Result<&mut [u8]> {
        let slot = self.ensure_resident(store, index)?;
        let s = &mut self.slots[slot];
        s.dirty = true;
        Ok(&mut s.data.as_mut().expect("resident slot holds data")[..s.len])
    }

    /// Replace a brick's bytes wholesale and mark it dirty.
    ///
    /// Skips the disk read a [`BrickCache::get_mut`] miss would do.
    pub fn put(&mut self, store: &mut OctreeBuilder, index: u64, bytes: &[u8]) -> Result<()> {
        let len = store.brick_len(index)?;
        if bytes.len() != len {
            return Err(Error::OutOfRange(format!(
                "brick {index} payload is {} bytes, expected {len}",
                bytes.len()
            )));
        }
        let slot = match self.find(index) {
            Some(slot) => {
                let access = self.bump();
                self.slots[slot].last_access = access;
                slot
            }
            None => {
                let slot = self.evict_slot(store)?;
                let access = self.bump();
                let slot_bytes = self.slot_bytes;
                let s = &mut self.slots[slot];
                s.data.get_or_insert_with(|| vec![0u8; slot_bytes]);
                s.index = index;
                s.len = len;
                s.last_access = access;
                slot
            }
        };
        let s = &mut self.slots[slot];
        s.data.as_mut().expect("resident slot holds data")[..len].copy_from_slice(bytes);
        s.dirty = true;
        Ok(())
    }

    /// Write every dirty slot back to the store.
    pub fn flush_all(&mut self, store: &mut OctreeBuilder) -> Result<()> {
        for slot in 0..self.slots.len() {
            self.flush_slot(store, slot)?;
        }
        Ok(())
    }
}
