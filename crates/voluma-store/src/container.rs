//! The outer container file: global header, typed blocks, checksum.
//!
//! A container wraps the octree store plus auxiliary blocks (statistics,
//! key/value metadata, optionally geometry) behind one global header.
//! Every multi-byte field in the file follows the header's endianness
//! flag; the checksum is a truncated blake3 digest over the whole file
//! with the 16 checksum bytes zeroed.

use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use voluma_core::{Error, Result};

use crate::octree::OctreeStore;
use crate::raw_file::RawFile;
use crate::stats::StatsBlock;
use crate::wire::{ByteReader, ByteWriter, Endianness};

/// Magic bytes of the container header.
pub const CONTAINER_MAGIC: [u8; 4] = *b"UVF_";

/// Current container version.
pub const CONTAINER_VERSION: u64 = 1;

/// Byte length of the global header.
const HEADER_LEN: u64 = 44;

/// Offset of the 16-byte checksum field within the header.
const CHECKSUM_OFFSET: u64 = 28;

/// Chunk size for streaming copies and checksum computation.
const COPY_CHUNK: usize = 1 << 20;

/// Whole-file checksum scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumKind {
    /// No checksum; the field stays zero.
    None,
    /// blake3 digest truncated to 16 bytes.
    #[default]
    Blake3,
}

impl ChecksumKind {
    /// On-disk scheme tag.
    #[inline]
    pub const fn tag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Blake3 => 1,
        }
    }

    /// Decode the on-disk scheme tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Blake3),
            other => Err(Error::Format(format!("unknown checksum scheme {other}"))),
        }
    }
}

/// Known block type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockType {
    /// The bricked LoD octree with its ToC.
    RasterToc = 1,
    /// Per-brick min/max statistics.
    Statistics = 2,
    /// String key/value metadata.
    KeyValue = 3,
    /// Triangle geometry; reserved, no payload logic in the core.
    Geometry = 4,
}

impl BlockType {
    /// On-disk block tag.
    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Decode a block tag; unknown tags stay readable as raw bytes.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::RasterToc),
            2 => Some(Self::Statistics),
            3 => Some(Self::KeyValue),
            4 => Some(Self::Geometry),
            _ => None,
        }
    }
}

/// Directory entry of one block.
#[derive(Clone, Copy, Debug)]
pub struct BlockEntry {
    /// Raw block type tag.
    pub tag: u32,
    /// File offset of the block payload (past the block prefix).
    pub offset: u64,
    /// Payload byte count.
    pub size: u64,
}

fn encode_header(
    endian: Endianness,
    checksum: ChecksumKind,
    block_count: u64,
    digest: &[u8; 16],
) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(endian, HEADER_LEN as usize);
    w.put_bytes(&CONTAINER_MAGIC);
    w.put_u64(CONTAINER_VERSION);
    w.put_u32(checksum.tag());
    w.put_u8(endian.flag());
    w.put_bytes(&[0u8; 3]);
    w.put_u64(block_count);
    w.put_bytes(digest);
    debug_assert_eq!(w.len() as u64, HEADER_LEN);
    w.into_vec()
}

/// Stream the whole file through blake3 with the checksum field zeroed.
fn compute_checksum(file: &mut RawFile) -> Result<[u8; 16]> {
    let len = file.size()?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    while offset < len {
        let n = ((len - offset) as usize).min(COPY_CHUNK);
        file.read_exact_at(offset, &mut buf[..n])?;
        // Zero any bytes of the checksum field inside this chunk.
        let lo = CHECKSUM_OFFSET.max(offset);
        let hi = (CHECKSUM_OFFSET + 16).min(offset + n as u64);
        if lo < hi {
            buf[(lo - offset) as usize..(hi - offset) as usize].fill(0);
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    Ok(digest)
}

/// Serialize string key/value pairs for a [`BlockType::KeyValue`] block.
pub fn encode_key_values(pairs: &[(String, String)], endian: Endianness) -> Vec<u8> {
    let mut w = ByteWriter::new(endian);
    w.put_u64(pairs.len() as u64);
    for (key, value) in pairs {
        w.put_u64(key.len() as u64);
        w.put_bytes(key.as_bytes());
        w.put_u64(value.len() as u64);
        w.put_bytes(value.as_bytes());
    }
    w.into_vec()
}

/// Deserialize a [`BlockType::KeyValue`] block.
pub fn decode_key_values(bytes: &[u8], endian: Endianness) -> Result<Vec<(String, String)>> {
    let mut r = ByteReader::new(bytes, endian);
    let count = r.u64()?;
    let mut pairs = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let klen = r.u64()? as usize;
        let key = std::str::from_utf8(r.bytes(klen)?)
            .map_err(|e| Error::Format(format!("key/value block holds invalid UTF-8: {e}")))?
            .to_owned();
        let vlen = r.u64()? as usize;
        let value = std::str::from_utf8(r.bytes(vlen)?)
            .map_err(|e| Error::Format(format!("key/value block holds invalid UTF-8: {e}")))?
            .to_owned();
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Write side of the container, used once per conversion.
pub struct ContainerWriter {
    file: RawFile,
    endian: Endianness,
    checksum: ChecksumKind,
    block_count: u64,
    cursor: u64,
}

impl ContainerWriter {
    /// Create a container with an empty block directory.
    pub fn create(
        path: impl AsRef<Path>,
        endian: Endianness,
        checksum: ChecksumKind,
    ) -> Result<Self> {
        let mut file = RawFile::create(path)?;
        file.write_all_at(0, &encode_header(endian, checksum, 0, &[0u8; 16]))?;
        Ok(Self {
            file,
            endian,
            checksum,
            block_count: 0,
            cursor: HEADER_LEN,
        })
    }

    fn put_block_prefix(&mut self, tag: u32, size: u64) -> Result<()> {
        let mut w = ByteWriter::with_capacity(self.endian, 12);
        w.put_u32(tag);
        w.put_u64(size);
        self.file.write_all_at(self.cursor, &w.into_vec())?;
        self.cursor += 12;
        Ok(())
    }

    /// Append a block from an in-memory payload.
    pub fn add_block_bytes(&mut self, tag: u32, payload: &[u8]) -> Result<()> {
        self.put_block_prefix(tag, payload.len() as u64)?;
        self.file.write_all_at(self.cursor, payload)?;
        self.cursor += payload.len() as u64;
        self.block_count += 1;
        debug!(tag, bytes = payload.len(), "container block added");
        Ok(())
    }

    /// Append a block streamed from another file in bounded chunks.
    pub fn add_block_from_file(
        &mut self,
        tag: u32,
        src: &mut RawFile,
        src_offset: u64,
        len: u64,
    ) -> Result<()> {
        self.put_block_prefix(tag, len)?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        while copied < len {
            let n = ((len - copied) as usize).min(COPY_CHUNK);
            src.read_exact_at(src_offset + copied, &mut buf[..n])?;
            self.file.write_all_at(self.cursor + copied, &buf[..n])?;
            copied += n as u64;
        }
        self.cursor += len;
        self.block_count += 1;
        debug!(tag, bytes = len, "container block streamed");
        Ok(())
    }

    /// Rewrite the header with the final block count and checksum.
    pub fn finish(mut self) -> Result<()> {
        self.file.write_all_at(
            0,
            &encode_header(self.endian, self.checksum, self.block_count, &[0u8; 16]),
        )?;
        if self.checksum != ChecksumKind::None {
            let digest = compute_checksum(&mut self.file)?;
            self.file.write_all_at(CHECKSUM_OFFSET, &digest)?;
        }
        self.file.sync()?;
        info!(
            path = %self.file.path().display(),
            blocks = self.block_count,
            bytes = self.cursor,
            "container written"
        );
        Ok(())
    }
}

/// Read side of the container.
pub struct ContainerFile {
    file: Mutex<RawFile>,
    endian: Endianness,
    checksum: ChecksumKind,
    stored_digest: [u8; 16],
    blocks: Vec<BlockEntry>,
}

impl ContainerFile {
    /// Open and validate a container; optionally verify its checksum.
    pub fn open(path: impl AsRef<Path>, verify: bool) -> Result<Self> {
        let mut file = RawFile::open(path)?;
        let len = file.size()?;
        if len < HEADER_LEN {
            return Err(Error::Format(format!(
                "file of {len} bytes is smaller than the container header"
            )));
        }
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact_at(0, &mut header)?;
        // The endianness flag governs every other field, so peek it first.
        let endian = Endianness::from_flag(header[16])?;
        let mut r = ByteReader::new(&header, endian);
        let magic = r.bytes(4)?;
        if magic != CONTAINER_MAGIC {
            return Err(Error::Format(format!("bad container magic {magic:02x?}")));
        }
        let version = r.u64()?;
        if version != CONTAINER_VERSION {
            return Err(Error::Format(format!(
                "unsupported container version {version}, expected {CONTAINER_VERSION}"
            )));
        }
        let checksum = ChecksumKind::from_tag(r.u32()?)?;
        r.skip(4)?; // endianness + reserved
        let block_count = r.u64()?;
        let mut stored_digest = [0u8; 16];
        stored_digest.copy_from_slice(r.bytes(16)?);

        let mut blocks = Vec::with_capacity(block_count.min(1024) as usize);
        let mut cursor = HEADER_LEN;
        for _ in 0..block_count {
            if cursor + 12 > len {
                return Err(Error::Format(format!(
                    "block directory runs past the {len}-byte file"
                )));
            }
            let mut prefix = [0u8; 12];
            file.read_exact_at(cursor, &mut prefix)?;
            let mut pr = ByteReader::new(&prefix, endian);
            let tag = pr.u32()?;
            let size = pr.u64()?;
            let offset = cursor + 12;
            if offset.checked_add(size).map_or(true, |end| end > len) {
                return Err(Error::Format(format!(
                    "block {tag} of {size} bytes runs past the {len}-byte file"
                )));
            }
            blocks.push(BlockEntry { tag, offset, size });
            cursor = offset + size;
        }

        let container = Self {
            file: Mutex::new(file),
            endian,
            checksum,
            stored_digest,
            blocks,
        };
        if verify {
            container.verify_checksum()?;
        }
        debug!(blocks = container.blocks.len(), "opened container");
        Ok(container)
    }

    /// Byte order of the container and all of its blocks.
    #[inline]
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// Checksum scheme declared in the header.
    #[inline]
    pub fn checksum_kind(&self) -> ChecksumKind {
        self.checksum
    }

    /// Block directory in file order.
    #[inline]
    pub fn blocks(&self) -> &[BlockEntry] {
        &self.blocks
    }

    /// First block of a given type.
    pub fn find_block(&self, block_type: BlockType) -> Option<BlockEntry> {
        self.blocks
            .iter()
            .find(|b| b.tag == block_type.tag())
            .copied()
    }

    /// Recompute the digest and compare with the stored one.
    pub fn verify_checksum(&self) -> Result<()> {
        if self.checksum == ChecksumKind::None {
            return Ok(());
        }
        let digest = compute_checksum(&mut self.file.lock())?;
        if digest != self.stored_digest {
            return Err(Error::Format(format!(
                "checksum mismatch: stored {:02x?}, computed {:02x?}",
                self.stored_digest, digest
            )));
        }
        Ok(())
    }

    /// Read a whole block payload into memory.
    pub fn read_block(&self, entry: BlockEntry) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; entry.size as usize];
        self.file.lock().read_exact_at(entry.offset, &mut buf)?;
        Ok(buf)
    }

    /// Open the octree store embedded in this container.
    ///
    /// The store gets its own file handle, so readers do not contend with
    /// other block access.
    pub fn octree(&self) -> Result<OctreeStore> {
        let entry = self
            .find_block(BlockType::RasterToc)
            .ok_or_else(|| Error::Format("container has no raster ToC block".into()))?;
        let file = self.file.lock().try_clone()?;
        OctreeStore::open_at(file, entry.offset, entry.size, self.endian)
    }

    /// Load the statistics block, if present.
    pub fn statistics(&self) -> Result<Option<StatsBlock>> {
        match self.find_block(BlockType::Statistics) {
            Some(entry) => {
                let bytes = self.read_block(entry)?;
                Ok(Some(StatsBlock::decode(&bytes, self.endian)?))
            }
            None => Ok(None),
        }
    }

    /// Load the key/value metadata block, if present.
    pub fn key_values(&self) -> Result<Option<Vec<(String, String)>>> {
        match self.find_block(BlockType::KeyValue) {
            Some(entry) => {
                let bytes = self.read_block(entry)?;
                Ok(Some(decode_key_values(&bytes, self.endian)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_roundtrip_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.uvf");

        let mut writer =
            ContainerWriter::create(&path, Endianness::Little, ChecksumKind::Blake3).unwrap();
        writer
            .add_block_bytes(BlockType::Statistics.tag(), &[1, 2, 3, 4])
            .unwrap();
        let pairs = vec![("source".to_owned(), "volume.raw".to_owned())];
        writer
            .add_block_bytes(
                BlockType::KeyValue.tag(),
                &encode_key_values(&pairs, Endianness::Little),
            )
            .unwrap();
        writer.finish().unwrap();

        let container = ContainerFile::open(&path, true).unwrap();
        assert_eq!(container.blocks().len(), 2);
        let stats = container.find_block(BlockType::Statistics).unwrap();
        assert_eq!(container.read_block(stats).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(container.key_values().unwrap().unwrap(), pairs);
        assert!(container.find_block(BlockType::Geometry).is_none());
    }

    #[test]
    fn streamed_block_matches_source() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("block.bin");
        let path = dir.path().join("vol.uvf");

        let payload: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let mut src = RawFile::create(&src_path).unwrap();
        src.write_all_at(0, &payload).unwrap();

        let mut writer =
            ContainerWriter::create(&path, Endianness::Little, ChecksumKind::Blake3).unwrap();
        writer
            .add_block_from_file(BlockType::RasterToc.tag(), &mut src, 0, payload.len() as u64)
            .unwrap();
        writer.finish().unwrap();

        let container = ContainerFile::open(&path, true).unwrap();
        let entry = container.find_block(BlockType::RasterToc).unwrap();
        assert_eq!(container.read_block(entry).unwrap(), payload);
    }

    #[test]
    fn tampering_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.uvf");

        let mut writer =
            ContainerWriter::create(&path, Endianness::Little, ChecksumKind::Blake3).unwrap();
        writer
            .add_block_bytes(BlockType::Statistics.tag(), &[9u8; 32])
            .unwrap();
        writer.finish().unwrap();

        // Flip one payload byte.
        let mut file = RawFile::open_rw(&path).unwrap();
        let len = file.size().unwrap();
        file.write_all_at(len - 1, &[0xff]).unwrap();
        drop(file);

        assert!(matches!(
            ContainerFile::open(&path, true),
            Err(Error::Format(_))
        ));
        // Without verification the file still opens and lists its blocks.
        let container = ContainerFile::open(&path, false).unwrap();
        assert_eq!(container.blocks().len(), 1);
        assert!(container.verify_checksum().is_err());
    }

    #[test]
    fn big_endian_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.uvf");

        let mut writer =
            ContainerWriter::create(&path, Endianness::Big, ChecksumKind::Blake3).unwrap();
        let pairs = vec![("endian".to_owned(), "big".to_owned())];
        writer
            .add_block_bytes(
                BlockType::KeyValue.tag(),
                &encode_key_values(&pairs, Endianness::Big),
            )
            .unwrap();
        writer.finish().unwrap();

        let container = ContainerFile::open(&path, true).unwrap();
        assert_eq!(container.endian(), Endianness::Big);
        assert_eq!(container.key_values().unwrap().unwrap(), pairs);
    }

    #[test]
    fn rejects_truncated_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.uvf");

        let mut writer =
            ContainerWriter::create(&path, Endianness::Little, ChecksumKind::None).unwrap();
        writer
            .add_block_bytes(BlockType::Statistics.tag(), &[0u8; 64])
            .unwrap();
        writer.finish().unwrap();

        // Chop the payload short; the directory now points past the file.
        let mut file = RawFile::open_rw(&path).unwrap();
        let len = file.size().unwrap();
        file.truncate(len - 32).unwrap();
        drop(file);

        assert!(matches!(
            ContainerFile::open(&path, false),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn key_value_roundtrip_preserves_order() {
        let pairs = vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), String::new()),
            ("unicode".to_owned(), "π ≈ 3".to_owned()),
        ];
        for endian in [Endianness::Little, Endianness::Big] {
            let bytes = encode_key_values(&pairs, endian);
            assert_eq!(decode_key_values(&bytes, endian).unwrap(), pairs);
        }
    }
}
