use super::MAX_VARINT_LEN;
use crate::error::{Error, Result};

/// Bounds-checked, position-tracking reader over a byte slice.
///
/// The position starts at 0 and is relative to the wrapped slice. Errors
/// report absolute offsets: the cursor adds its `base` (the slice's offset
/// inside the top-level buffer) to every offset it reports.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor over `data` whose offsets are reported as-is
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Creates a cursor over `data`, reporting offsets shifted by `base`
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Current position relative to the wrapped slice
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Current position relative to the top-level buffer
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The unread tail of the slice
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Reads a base-128 varint of at most 10 bytes.
    ///
    /// On failure the position is left where the read started.
    pub fn read_varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut result: u64 = 0;

        for (i, &byte) in self.data[start..].iter().enumerate() {
            if i >= MAX_VARINT_LEN {
                break;
            }

            // The tenth byte only has room for the top bit of a u64
            if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
                break;
            }

            result |= ((byte & 0x7F) as u64) << (7 * i);

            if byte & 0x80 == 0 {
                self.pos = start + i + 1;
                return Ok(result);
            }
        }

        Err(Error::malformed_varint(self.base + start))
    }

    /// Reads a little-endian `u32`
    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads a little-endian `u64`
    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Returns a view of the next `n` bytes and advances past them
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::buffer_underflow(
                self.absolute_position(),
                n,
                self.remaining(),
            ));
        }

        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}
