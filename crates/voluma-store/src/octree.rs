//! The bricked LoD store and its on-disk table of contents.
//!
//! File layout (all offsets relative to the store's base offset, which is
//! 0 for a standalone file and the block payload offset inside a
//! container):
//!
//! ```text
//! header | brick payloads ... | ToC
//! ```
//!
//! During a build every brick occupies a fixed offset sized for its raw
//! (uncompressed) payload, so bricks can be rewritten freely while the
//! converter permutes and downsamples. The final compression pass rewrites
//! the payload front to back in index order, which keeps ToC offsets
//! strictly monotone. A finalized store is read-only.

use glam::{DVec3, U64Vec3, UVec3};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use voluma_codec::Codec;
use voluma_core::{BrickLayout, ComponentType, Error, Result, VolumeMeta};

use crate::raw_file::RawFile;
use crate::wire::{ByteReader, ByteWriter, Endianness};

/// Magic bytes of the octree header.
pub const OCTREE_MAGIC: [u8; 4] = *b"EOCT";

/// Current format version.
pub const OCTREE_VERSION: u32 = 1;

/// Byte length of the fixed header.
pub const HEADER_LEN: u64 = 108;

/// Byte length of one ToC entry.
pub const TOC_ENTRY_LEN: u64 = 32;

/// One fixed-width ToC record, in 1D brick-index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocEntry {
    /// Payload offset relative to the store base.
    pub offset: u64,
    /// Stored (possibly compressed) byte count.
    pub size_compressed: u64,
    /// Decoded byte count.
    pub size_uncompressed: u64,
    /// Codec tag; see [`Codec`].
    pub codec_tag: u32,
    pub reserved: u32,
}

fn encode_header(
    endian: Endianness,
    meta: &VolumeMeta,
    layout: &BrickLayout,
    toc_offset: u64,
) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(endian, HEADER_LEN as usize);
    w.put_bytes(&OCTREE_MAGIC);
    w.put_u32(OCTREE_VERSION);
    w.put_u32(meta.component_type.tag());
    w.put_u32(meta.component_count);
    w.put_u64(meta.size.x);
    w.put_u64(meta.size.y);
    w.put_u64(meta.size.z);
    w.put_f64(meta.aspect.x);
    w.put_f64(meta.aspect.y);
    w.put_f64(meta.aspect.z);
    w.put_u32(layout.max_brick().x);
    w.put_u32(layout.max_brick().y);
    w.put_u32(layout.max_brick().z);
    w.put_u32(layout.overlap());
    w.put_u32(layout.lod_count());
    w.put_u64(layout.total_bricks());
    w.put_u64(toc_offset);
    w.put_u64(HEADER_LEN);
    debug_assert_eq!(w.len() as u64, HEADER_LEN);
    w.into_vec()
}

struct Header {
    meta: VolumeMeta,
    layout: BrickLayout,
    toc_offset: u64,
    payload_offset: u64,
}

fn parse_header(buf: &[u8], endian: Endianness) -> Result<Header> {
    let mut r = ByteReader::new(buf, endian);
    let magic = r.bytes(4)?;
    if magic != OCTREE_MAGIC {
        return Err(Error::Format(format!("bad octree magic {magic:02x?}")));
    }
    let version = r.u32()?;
    if version != OCTREE_VERSION {
        return Err(Error::Format(format!(
            "unsupported octree version {version}, expected {OCTREE_VERSION}"
        )));
    }
    let component_type = ComponentType::from_tag(r.u32()?)?;
    let component_count = r.u32()?;
    let size = U64Vec3::new(r.u64()?, r.u64()?, r.u64()?);
    let aspect = DVec3::new(r.f64()?, r.f64()?, r.f64()?);
    let max_brick = UVec3::new(r.u32()?, r.u32()?, r.u32()?);
    let overlap = r.u32()?;
    let lod_count = r.u32()?;
    let toc_entry_count = r.u64()?;
    let toc_offset = r.u64()?;
    let payload_offset = r.u64()?;

    let meta = VolumeMeta::new(size, aspect, component_type, component_count)?;
    let layout = BrickLayout::new(size, max_brick, overlap)?;
    if lod_count != layout.lod_count() || toc_entry_count != layout.total_bricks() {
        return Err(Error::Format(format!(
            "header claims {lod_count} LoDs / {toc_entry_count} bricks, layout yields {} / {}",
            layout.lod_count(),
            layout.total_bricks()
        )));
    }
    if toc_offset < payload_offset {
        return Err(Error::Format(format!(
            "ToC offset {toc_offset} precedes payload offset {payload_offset}"
        )));
    }
    Ok(Header {
        meta,
        layout,
        toc_offset,
        payload_offset,
    })
}

/// Write side of the octree store, used only during conversion.
pub struct OctreeBuilder {
    file: RawFile,
    endian: Endianness,
    meta: VolumeMeta,
    layout: BrickLayout,
    toc: Vec<TocEntry>,
    /// One past the last payload byte.
    payload_end: u64,
}

impl OctreeBuilder {
    /// Create a new store file with bricks at their raw-size offsets.
    ///
    /// The payload region is zero-filled; a brick reads back as zeros
    /// until it is first written.
    pub fn create(
        path: impl AsRef<Path>,
        meta: VolumeMeta,
        layout: BrickLayout,
        endian: Endianness,
    ) -> Result<Self> {
        let voxel_bytes = meta.voxel_bytes() as u64;
        let total = layout.total_bricks();
        let mut toc = Vec::with_capacity(total as usize);
        let mut offset = HEADER_LEN;
        for index in 0..total {
            let key = layout.key_from_index(index)?;
            let raw = layout.brick_voxels(key)? * voxel_bytes;
            toc.push(TocEntry {
                offset,
                size_compressed: raw,
                size_uncompressed: raw,
                codec_tag: Codec::Identity.tag(),
                reserved: 0,
            });
            offset += raw;
        }

        let mut file = RawFile::create(path.as_ref())?;
        file.write_all_at(0, &encode_header(endian, &meta, &layout, 0))?;
        file.truncate(offset)?;
        debug!(
            path = %path.as_ref().display(),
            bricks = total,
            payload_bytes = offset - HEADER_LEN,
            "created octree store"
        );
        Ok(Self {
            file,
            endian,
            meta,
            layout,
            toc,
            payload_end: offset,
        })
    }

    /// Volume metadata of the store under construction.
    #[inline]
    pub fn meta(&self) -> &VolumeMeta {
        &self.meta
    }

    /// Brick layout of the store under construction.
    #[inline]
    pub fn layout(&self) -> &BrickLayout {
        &self.layout
    }

    fn entry(&self, index: u64) -> Result<TocEntry> {
        self.toc
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::OutOfRange(format!("brick index {index} past ToC")))
    }

    /// Raw byte size of a brick's payload.
    pub fn brick_len(&self, index: u64) -> Result<usize> {
        Ok(self.entry(index)?.size_uncompressed as usize)
    }

    /// Write a brick's raw payload at its fixed offset.
    pub fn write_brick(&mut self, index: u64, data: &[u8]) -> Result<()> {
        let entry = self.entry(index)?;
        if data.len() as u64 != entry.size_uncompressed {
            return Err(Error::OutOfRange(format!(
                "brick {index} payload is {} bytes, expected {}",
                data.len(),
                entry.size_uncompressed
            )));
        }
        self.file.write_all_at(entry.offset, data)
    }

    /// Read a brick's raw payload back; `out` must match the brick size.
    pub fn read_brick(&mut self, index: u64, out: &mut [u8]) -> Result<()> {
        let entry = self.entry(index)?;
        if out.len() as u64 != entry.size_uncompressed {
            return Err(Error::OutOfRange(format!(
                "brick {index} buffer is {} bytes, expected {}",
                out.len(),
                entry.size_uncompressed
            )));
        }
        self.file.read_exact_at(entry.offset, out)
    }

    /// Re-encode every brick with `codec` and compact the payload.
    ///
    /// Bricks are processed in index order; each is read before the write
    /// cursor reaches it, and the encoder's identity fallback guarantees
    /// the cursor never outruns an unread brick. `on_brick` is invoked
    /// after each brick and may abort the pass by returning an error.
    pub fn compress_payload<F>(&mut self, codec: Codec, mut on_brick: F) -> Result<()>
    where
        F: FnMut(u64) -> Result<()>,
    {
        let mut tail = HEADER_LEN;
        let mut raw = Vec::new();
        for index in 0..self.toc.len() as u64 {
            let entry = self.toc[index as usize];
            raw.resize(entry.size_uncompressed as usize, 0);
            self.file.read_exact_at(entry.offset, &mut raw)?;
            let encoded = voluma_codec::encode(&raw, codec);
            debug_assert!(tail <= entry.offset);
            self.file.write_all_at(tail, &encoded.data)?;
            self.toc[index as usize] = TocEntry {
                offset: tail,
                size_compressed: encoded.data.len() as u64,
                size_uncompressed: entry.size_uncompressed,
                codec_tag: encoded.codec.tag(),
                reserved: 0,
            };
            tail += encoded.data.len() as u64;
            on_brick(index)?;
        }
        trace!(
            payload_bytes = tail - HEADER_LEN,
            "compacted payload after compression"
        );
        self.payload_end = tail;
        Ok(())
    }

    /// Write the ToC, rewrite the header, and truncate the file.
    ///
    /// Returns the total byte size of the finished store.
    pub fn finalize(mut self) -> Result<u64> {
        let toc_offset = self.payload_end;
        let mut w =
            ByteWriter::with_capacity(self.endian, self.toc.len() * TOC_ENTRY_LEN as usize);
        for entry in &self.toc {
            w.put_u64(entry.offset);
            w.put_u64(entry.size_compressed);
            w.put_u64(entry.size_uncompressed);
            w.put_u32(entry.codec_tag);
            w.put_u32(entry.reserved);
        }
        let toc_bytes = w.into_vec();
        self.file.write_all_at(toc_offset, &toc_bytes)?;
        self.file
            .write_all_at(0, &encode_header(self.endian, &self.meta, &self.layout, toc_offset))?;
        let total = toc_offset + toc_bytes.len() as u64;
        self.file.truncate(total)?;
        self.file.sync()?;
        debug!(bytes = total, "finalized octree store");
        Ok(total)
    }
}

/// Read side of the octree store.
///
/// The in-memory ToC is immutable and shared; the file handle's seek
/// position is guarded by a lock so reads can take `&self`. For
/// contention-free reading, [`OctreeStore::try_clone`] duplicates the
/// handle per reader.
pub struct OctreeStore {
    file: Mutex<RawFile>,
    base: u64,
    /// Bytes available to this store, measured from `base`.
    len: u64,
    endian: Endianness,
    meta: VolumeMeta,
    layout: BrickLayout,
    toc: Arc<Vec<TocEntry>>,
    payload_offset: u64,
}

impl OctreeStore {
    /// Open a standalone (little-endian) octree file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = RawFile::open(path)?;
        let len = file.size()?;
        Self::open_at(file, 0, len, Endianness::Little)
    }

    /// Open an octree embedded at `base` in a larger file.
    ///
    /// `len` is the byte size of the region belonging to this store.
    pub fn open_at(mut file: RawFile, base: u64, len: u64, endian: Endianness) -> Result<Self> {
        if len < HEADER_LEN {
            return Err(Error::Format(format!(
                "octree region of {len} bytes is smaller than the header"
            )));
        }
        let mut header_buf = [0u8; HEADER_LEN as usize];
        file.read_exact_at(base, &mut header_buf)?;
        let header = parse_header(&header_buf, endian)?;

        let toc_len = header.layout.total_bricks() * TOC_ENTRY_LEN;
        if header
            .toc_offset
            .checked_add(toc_len)
            .map_or(true, |end| end > len)
        {
            return Err(Error::Format(format!(
                "ToC of {toc_len} bytes at {} exceeds the {len}-byte region",
                header.toc_offset
            )));
        }
        let mut toc_bytes = vec![0u8; toc_len as usize];
        file.read_exact_at(base + header.toc_offset, &mut toc_bytes)?;
        let mut r = ByteReader::new(&toc_bytes, endian);
        let mut toc = Vec::with_capacity(header.layout.total_bricks() as usize);
        for _ in 0..header.layout.total_bricks() {
            toc.push(TocEntry {
                offset: r.u64()?,
                size_compressed: r.u64()?,
                size_uncompressed: r.u64()?,
                codec_tag: r.u32()?,
                reserved: r.u32()?,
            });
        }
        debug!(
            bricks = toc.len(),
            lods = header.layout.lod_count(),
            "opened octree store"
        );
        Ok(Self {
            file: Mutex::new(file),
            base,
            len,
            endian,
            meta: header.meta,
            layout: header.layout,
            toc: Arc::new(toc),
            payload_offset: header.payload_offset,
        })
    }

    /// Volume metadata.
    #[inline]
    pub fn meta(&self) -> &VolumeMeta {
        &self.meta
    }

    /// Brick layout.
    #[inline]
    pub fn layout(&self) -> &BrickLayout {
        &self.layout
    }

    /// Byte order of the store.
    #[inline]
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// ToC entry for a brick index.
    pub fn toc_entry(&self, index: u64) -> Result<TocEntry> {
        self.toc
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::OutOfRange(format!("brick index {index} past ToC")))
    }

    /// Decoded byte size of a brick.
    pub fn brick_len(&self, index: u64) -> Result<usize> {
        Ok(self.toc_entry(index)?.size_uncompressed as usize)
    }

    /// Read and decode one brick into a fresh buffer.
    pub fn read_brick(&self, index: u64) -> Result<Vec<u8>> {
        let entry = self.toc_entry(index)?;
        let mut out = vec![0u8; entry.size_uncompressed as usize];
        self.read_brick_into(index, &mut out)?;
        Ok(out)
    }

    /// Read and decode the brick at `(x, y, z, lod)`.
    pub fn read_brick_at(&self, key: voluma_core::BrickKey) -> Result<Vec<u8>> {
        let index = self.layout.linear_index(key)?;
        self.read_brick(index)
    }

    /// Read and decode one brick; `out` must match the decoded size.
    ///
    /// A damaged entry surfaces as [`Error::CorruptBrick`] and leaves the
    /// store usable for every other brick.
    pub fn read_brick_into(&self, index: u64, out: &mut [u8]) -> Result<()> {
        let entry = self.toc_entry(index)?;
        if out.len() as u64 != entry.size_uncompressed {
            return Err(Error::OutOfRange(format!(
                "brick {index} buffer is {} bytes, expected {}",
                out.len(),
                entry.size_uncompressed
            )));
        }
        let in_bounds = entry.offset >= self.payload_offset
            && entry
                .offset
                .checked_add(entry.size_compressed)
                .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(Error::CorruptBrick {
                index,
                reason: format!(
                    "stored range {}+{} lies outside the {}-byte store",
                    entry.offset, entry.size_compressed, self.len
                ),
            });
        }
        let mut encoded = vec![0u8; entry.size_compressed as usize];
        self.file
            .lock()
            .read_exact_at(self.base + entry.offset, &mut encoded)?;
        let codec = Codec::from_tag(entry.codec_tag)?;
        let raw = voluma_codec::decode(&encoded, codec, entry.size_uncompressed as usize)
            .map_err(|e| match e {
                Error::Codec(reason) => Error::CorruptBrick { index, reason },
                other => other,
            })?;
        out.copy_from_slice(&raw);
        Ok(())
    }

    /// Duplicate the store with an independent file handle.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(self.file.lock().try_clone()?),
            base: self.base,
            len: self.len,
            endian: self.endian,
            meta: self.meta,
            layout: self.layout.clone(),
            toc: Arc::clone(&self.toc),
            payload_offset: self.payload_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voluma_core::BrickKey;

    fn meta_u8(size: (u64, u64, u64)) -> VolumeMeta {
        VolumeMeta::new(
            U64Vec3::new(size.0, size.1, size.2),
            DVec3::ONE,
            ComponentType::U8,
            1,
        )
        .unwrap()
    }

    fn fill_all_bricks(builder: &mut OctreeBuilder) {
        for index in 0..builder.layout().total_bricks() {
            let len = builder.brick_len(index).unwrap();
            let data: Vec<u8> = (0..len).map(|i| (i as u64 + index) as u8).collect();
            builder.write_brick(index, &data).unwrap();
        }
    }

    #[test]
    fn build_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((8, 4, 4));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 0).unwrap();

        let mut builder =
            OctreeBuilder::create(&path, meta, layout.clone(), Endianness::Little).unwrap();
        fill_all_bricks(&mut builder);
        builder.finalize().unwrap();

        let store = OctreeStore::open(&path).unwrap();
        assert_eq!(store.layout().total_bricks(), layout.total_bricks());
        for index in 0..layout.total_bricks() {
            let data = store.read_brick(index).unwrap();
            let len = store.brick_len(index).unwrap();
            let expect: Vec<u8> = (0..len).map(|i| (i as u64 + index) as u8).collect();
            assert_eq!(data, expect);
        }
    }

    #[test]
    fn unwritten_bricks_read_as_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((4, 4, 4));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 0).unwrap();

        let mut builder = OctreeBuilder::create(&path, meta, layout, Endianness::Little).unwrap();
        let mut buf = vec![0xffu8; 64];
        builder.read_brick(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn compression_keeps_toc_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((8, 8, 8));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 0).unwrap();

        let mut builder =
            OctreeBuilder::create(&path, meta, layout.clone(), Endianness::Little).unwrap();
        // Constant-valued bricks compress well.
        for index in 0..layout.total_bricks() {
            let len = builder.brick_len(index).unwrap();
            builder.write_brick(index, &vec![index as u8; len]).unwrap();
        }
        builder.compress_payload(Codec::Deflate, |_| Ok(())).unwrap();
        let total = builder.finalize().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), total);

        let store = OctreeStore::open(&path).unwrap();
        let mut prev_end = 0;
        for index in 0..layout.total_bricks() {
            let entry = store.toc_entry(index).unwrap();
            assert!(entry.offset >= prev_end);
            assert!(entry.size_compressed < entry.size_uncompressed);
            assert_eq!(entry.codec_tag, Codec::Deflate.tag());
            prev_end = entry.offset + entry.size_compressed;

            let len = store.brick_len(index).unwrap();
            assert_eq!(store.read_brick(index).unwrap(), vec![index as u8; len]);
        }
    }

    #[test]
    fn big_endian_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((4, 4, 4));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 0).unwrap();

        let mut builder =
            OctreeBuilder::create(&path, meta, layout, Endianness::Big).unwrap();
        fill_all_bricks(&mut builder);
        builder.finalize().unwrap();

        // A little-endian open sees a garbled header.
        assert!(OctreeStore::open(&path).is_err());

        let file = RawFile::open(&path).unwrap();
        let len = file.size().unwrap();
        let store = OctreeStore::open_at(file, 0, len, Endianness::Big).unwrap();
        assert_eq!(store.read_brick(0).unwrap()[..4], [0, 1, 2, 3]);
    }

    #[test]
    fn corrupt_toc_entry_affects_only_that_brick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((8, 4, 4));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 0).unwrap();
        assert!(layout.total_bricks() >= 2);

        let mut builder =
            OctreeBuilder::create(&path, meta, layout.clone(), Endianness::Little).unwrap();
        fill_all_bricks(&mut builder);
        builder.finalize().unwrap();

        // Patch brick 0's size_compressed to exceed the file size.
        let store = OctreeStore::open(&path).unwrap();
        // The ToC follows the contiguous payload.
        let payload: u64 = (0..layout.total_bricks())
            .map(|i| store.toc_entry(i).unwrap().size_compressed)
            .sum();
        let toc_offset = HEADER_LEN + payload;
        drop(store);
        let mut file = RawFile::open_rw(&path).unwrap();
        let mut w = ByteWriter::new(Endianness::Little);
        w.put_u64(u64::MAX / 2);
        file.write_all_at(toc_offset + 8, &w.into_vec()).unwrap();
        drop(file);

        let store = OctreeStore::open(&path).unwrap();
        assert!(matches!(
            store.read_brick(0),
            Err(Error::CorruptBrick { index: 0, .. })
        ));
        // Every other brick still reads fine.
        for index in 1..layout.total_bricks() {
            store.read_brick(index).unwrap();
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-octree");
        let mut file = RawFile::create(&path).unwrap();
        file.write_all_at(0, &[0u8; HEADER_LEN as usize]).unwrap();
        drop(file);
        assert!(matches!(OctreeStore::open(&path), Err(Error::Format(_))));
    }

    #[test]
    fn brick_key_addressing_matches_linear_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.oct");
        let meta = meta_u8((8, 8, 8));
        let layout = BrickLayout::new(meta.size, UVec3::splat(4), 1).unwrap();

        let mut builder =
            OctreeBuilder::create(&path, meta, layout.clone(), Endianness::Little).unwrap();
        fill_all_bricks(&mut builder);
        builder.finalize().unwrap();

        let store = OctreeStore::open(&path).unwrap();
        let key = BrickKey::new(1, 1, 0, 1);
        let index = store.layout().linear_index(key).unwrap();
        let by_index = store.read_brick(index).unwrap();
        assert_eq!(
            by_index.len() as u64,
            store.layout().brick_voxels(key).unwrap()
        );
        assert_eq!(store.read_brick_at(key).unwrap(), by_index);
        assert!(store.read_brick_at(BrickKey::new(9, 0, 0, 0)).is_err());
    }
}
