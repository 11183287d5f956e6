//! Endian-aware field packing shared by every on-disk structure.
//!
//! The container's global header carries a single endianness flag that
//! applies uniformly to the octree header, the ToC, and every auxiliary
//! block. Standalone octree files are little-endian.

use voluma_core::{Error, Result};

/// Byte order of all multi-byte fields in a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// On-disk flag byte.
    #[inline]
    pub const fn flag(self) -> u8 {
        match self {
            Self::Little => 0,
            Self::Big => 1,
        }
    }

    /// Decode the on-disk flag byte.
    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(Self::Little),
            1 => Ok(Self::Big),
            other => Err(Error::Format(format!("unknown endianness flag {other}"))),
        }
    }
}

/// Sequential field writer over a growable buffer.
pub struct ByteWriter {
    buf: Vec<u8>,
    endian: Endianness,
}

impl ByteWriter {
    pub fn new(endian: Endianness) -> Self {
        Self {
            buf: Vec::new(),
            endian,
        }
    }

    pub fn with_capacity(endian: Endianness, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            endian,
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        match self.endian {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn put_u64(&mut self, v: u64) {
        match self.endian {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put_u64(v.to_bits());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential field reader over a byte slice.
///
/// Overruns surface as [`Error::Format`], never panics.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endianness,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8], endian: Endianness) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                let s = &self.buf[self.pos..end];
                self.pos = end;
                Ok(s)
            }
            None => Err(Error::Format(format!(
                "truncated record: wanted {n} bytes at offset {} of {}",
                self.pos,
                self.buf.len()
            ))),
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(match self.endian {
            Endianness::Little => u32::from_le_bytes(b),
            Endianness::Big => u32::from_be_bytes(b),
        })
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(match self.endian {
            Endianness::Little => u64::from_le_bytes(b),
            Endianness::Big => u64::from_be_bytes(b),
        })
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Bytes remaining after the current position.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_both_endiannesses() {
        for endian in [Endianness::Little, Endianness::Big] {
            let mut w = ByteWriter::new(endian);
            w.put_u8(7);
            w.put_u32(0xDEAD_BEEF);
            w.put_u64(0x0123_4567_89AB_CDEF);
            w.put_f64(-1.5);
            w.put_bytes(b"EOCT");
            let buf = w.into_vec();

            let mut r = ByteReader::new(&buf, endian);
            assert_eq!(r.u8().unwrap(), 7);
            assert_eq!(r.u32().unwrap(), 0xDEAD_BEEF);
            assert_eq!(r.u64().unwrap(), 0x0123_4567_89AB_CDEF);
            assert_eq!(r.f64().unwrap(), -1.5);
            assert_eq!(r.bytes(4).unwrap(), b"EOCT");
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn big_endian_byte_order() {
        let mut w = ByteWriter::new(Endianness::Big);
        w.put_u32(1);
        assert_eq!(w.into_vec(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn overrun_is_a_format_error() {
        let mut r = ByteReader::new(&[1, 2], Endianness::Little);
        assert!(matches!(r.u32(), Err(Error::Format(_))));
    }

    #[test]
    fn endianness_flag_roundtrip() {
        assert_eq!(Endianness::from_flag(0).unwrap(), Endianness::Little);
        assert_eq!(Endianness::from_flag(1).unwrap(), Endianness::Big);
        assert!(Endianness::from_flag(2).is_err());
    }
}
