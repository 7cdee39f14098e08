//! Length-checked reads over a borrowed byte region.
//!
//! Every structure in the segment is parsed through [`ByteCursor`] so that a malformed
//! size field turns into [`ReaderError::Truncated`] instead of an out-of-bounds read.

use crate::error::{ReaderError, ReaderResult};

/// Reads fixed-width native-endian fields at absolute offsets within a region.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    what: &'static str,
}

impl<'a> ByteCursor<'a> {
    /// Wrap `bytes`; `what` names the structure in error messages.
    pub fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self { bytes, what }
    }

    /// Total length of the region.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fail unless `needed` bytes are available at `offset`.
    pub fn require(&self, offset: usize, needed: usize) -> ReaderResult<()> {
        match offset.checked_add(needed) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            _ => Err(ReaderError::Truncated {
                what: self.what,
                offset,
                needed,
                available: self.bytes.len().saturating_sub(offset),
            }),
        }
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> ReaderResult<&'a [u8]> {
        self.require(offset, len)?;
        Ok(&self.bytes[offset..offset + len])
    }

    /// Borrow everything from `offset` to the end of the region.
    pub fn tail(&self, offset: usize) -> ReaderResult<&'a [u8]> {
        self.require(offset, 0)?;
        Ok(&self.bytes[offset..])
    }

    fn array<const N: usize>(&self, offset: usize) -> ReaderResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    /// Read a `u8`.
    pub fn u8(&self, offset: usize) -> ReaderResult<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    /// Read a native-endian `u16`.
    pub fn u16(&self, offset: usize) -> ReaderResult<u16> {
        self.array(offset).map(u16::from_ne_bytes)
    }

    /// Read a native-endian `u32`.
    pub fn u32(&self, offset: usize) -> ReaderResult<u32> {
        self.array(offset).map(u32::from_ne_bytes)
    }

    /// Read a native-endian `u32` and widen it to `usize`.
    pub fn usize32(&self, offset: usize) -> ReaderResult<usize> {
        self.u32(offset).map(|v| v as usize)
    }

    /// Read a native-endian `f64`.
    pub fn f64(&self, offset: usize) -> ReaderResult<f64> {
        self.array(offset).map(f64::from_ne_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_native_fields() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xBEEFu16.to_ne_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&42u32.to_ne_bytes());
        bytes.extend_from_slice(&1.5f64.to_ne_bytes());

        let cursor = ByteCursor::new(&bytes, "test");
        assert_eq!(cursor.u16(0).unwrap(), 0xBEEF);
        assert_eq!(cursor.u32(4).unwrap(), 42);
        assert_eq!(cursor.f64(8).unwrap(), 1.5);
        assert_eq!(cursor.tail(16).unwrap().len(), 0);
    }

    #[test]
    fn rejects_reads_past_the_end() {
        let bytes = [0u8; 6];
        let cursor = ByteCursor::new(&bytes, "header");

        match cursor.u32(4) {
            Err(ReaderError::Truncated {
                what,
                offset,
                needed,
                available,
            }) => {
                assert_eq!(what, "header");
                assert_eq!(offset, 4);
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(cursor.slice(usize::MAX, 2).is_err());
        assert!(cursor.tail(7).is_err());
    }
}
