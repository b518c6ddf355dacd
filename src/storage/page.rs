use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use crate::storage::error::{StorageError, StorageResult};

/// Width in bytes of every integer stored in a page, including length prefixes.
pub const INT_SIZE: usize = 8;

/// Upper bound on the encoded size of one character.
const MAX_BYTES_PER_CHAR: usize = 4;

/// A block-sized byte buffer with typed accessors.
///
/// Integers are signed 64-bit big-endian. Byte arrays and strings are stored as
/// an `INT_SIZE` length prefix followed by the raw bytes. Every accessor checks
/// its bounds, so a bad offset surfaces as [`StorageError::OutOfBounds`]
/// instead of a panic.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Creates a zero-filled page of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Wraps an existing byte buffer; used to encode and decode log records.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Fails unless `len` bytes starting at `offset` lie inside the page.
    pub fn check_bounds(&self, offset: usize, len: usize) -> StorageResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                size: self.data.len(),
            }),
        }
    }

    pub fn get_int(&self, offset: usize) -> StorageResult<i64> {
        self.check_bounds(offset, INT_SIZE)?;
        Ok(BigEndian::read_i64(&self.data[offset..offset + INT_SIZE]))
    }

    pub fn set_int(&mut self, offset: usize, value: i64) -> StorageResult<()> {
        self.check_bounds(offset, INT_SIZE)?;
        BigEndian::write_i64(&mut self.data[offset..offset + INT_SIZE], value);
        Ok(())
    }

    /// Reads a length-prefixed byte array.
    pub fn get_bytes(&self, offset: usize) -> StorageResult<&[u8]> {
        let len = self.get_int(offset)?;
        // A negative length can never fit; map it to a length that fails the check.
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let start = offset + INT_SIZE;
        self.check_bounds(start, len)?;
        Ok(&self.data[start..start + len])
    }

    /// Writes a length prefix followed by `bytes`. Nothing is written if the
    /// whole encoding does not fit.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> StorageResult<()> {
        self.check_bounds(offset, INT_SIZE + bytes.len())?;
        let start = offset + INT_SIZE;
        BigEndian::write_i64(&mut self.data[offset..start], bytes.len() as i64);
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_string(&self, offset: usize) -> StorageResult<String> {
        let bytes = self.get_bytes(offset)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| StorageError::InvalidUtf8 { offset })
    }

    pub fn set_string(&mut self, offset: usize, value: &str) -> StorageResult<()> {
        self.set_bytes(offset, value.as_bytes())
    }

    /// Worst-case number of bytes needed to store a string of `chars` characters.
    pub fn max_length(chars: usize) -> usize {
        INT_SIZE + chars * MAX_BYTES_PER_CHAR
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("len", &self.data.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip_is_big_endian() {
        let mut page = Page::new(64);
        page.set_int(8, 0x0102_0304_0506_0708).unwrap();

        assert_eq!(page.get_int(8).unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(&page.contents()[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);

        page.set_int(0, -1).unwrap();
        assert_eq!(page.get_int(0).unwrap(), -1);
    }

    #[test]
    fn test_string_layout() {
        let mut page = Page::new(64);
        page.set_string(16, "héllo").unwrap();

        assert_eq!(page.get_int(16).unwrap(), 6);
        assert_eq!(page.get_string(16).unwrap(), "héllo");
        assert_eq!(page.get_bytes(16).unwrap(), "héllo".as_bytes());
    }

    #[test]
    fn test_empty_string() {
        let mut page = Page::new(16);
        page.set_string(8, "").unwrap();
        assert_eq!(page.get_string(8).unwrap(), "");
    }

    #[test]
    fn test_out_of_bounds() {
        let mut page = Page::new(32);

        assert!(page.set_int(25, 1).is_err());
        assert!(page.get_int(32).is_err());
        assert!(page.get_int(usize::MAX).is_err());

        // The prefix fits but the body does not; the page is left untouched.
        let err = page.set_string(16, "0123456789").unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { offset: 16, .. }));
        assert!(page.contents().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_corrupt_length_prefix() {
        let mut page = Page::new(32);
        page.set_int(0, -5).unwrap();
        assert!(page.get_bytes(0).is_err());

        page.set_int(0, 1000).unwrap();
        assert!(page.get_bytes(0).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut page = Page::new(32);
        page.set_bytes(0, &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            page.get_string(0),
            Err(StorageError::InvalidUtf8 { offset: 0 })
        ));
    }

    #[test]
    fn test_max_length() {
        assert_eq!(Page::max_length(0), INT_SIZE);
        assert_eq!(Page::max_length(10), INT_SIZE + 40);

        let mut page = Page::new(Page::max_length(3));
        page.set_string(0, "日本語").unwrap();
        assert_eq!(page.get_string(0).unwrap(), "日本語");
    }
}
