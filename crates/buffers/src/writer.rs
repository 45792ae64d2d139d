//! Auto-growing binary buffer writer.

use crate::BufferError;

/// A binary buffer writer that grows geometrically as data is appended.
///
/// All multi-byte quantities are written little-endian. Positions handed out
/// by [`Writer::pos`] can later be back-patched with [`Writer::rewrite_i32_at`]
/// and [`Writer::rewrite_u8_at`], which is how length placeholders are filled
/// in once the length is known.
#[derive(Debug, Clone)]
pub struct Writer {
    /// The underlying buffer; only `uint8[..x]` holds written data.
    pub uint8: Vec<u8>,
    /// Current write position.
    pub x: usize,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    /// Creates a new writer with the default allocation size.
    pub fn new() -> Self {
        Self::with_alloc_size(256)
    }

    /// Creates a new writer with a custom initial allocation size.
    pub fn with_alloc_size(alloc_size: usize) -> Self {
        Self {
            uint8: vec![0; alloc_size.max(1)],
            x: 0,
        }
    }

    /// Returns the current write position.
    pub fn pos(&self) -> usize {
        self.x
    }

    /// Moves the write position. The new position must not exceed the
    /// written region.
    pub fn set_pos(&mut self, pos: usize) -> Result<(), BufferError> {
        if pos > self.x {
            return Err(BufferError::Overflow);
        }
        self.x = pos;
        Ok(())
    }

    /// Ensures capacity for `capacity` more bytes, doubling the buffer as
    /// often as needed.
    #[inline]
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let required = self.x + capacity;
        if required <= self.uint8.len() {
            return;
        }
        let mut len = self.uint8.len().max(1);
        while len < required {
            len *= 2;
        }
        self.uint8.resize(len, 0);
    }

    /// Discards everything written so far.
    pub fn reset(&mut self) {
        self.x = 0;
    }

    /// Returns the written bytes without consuming the writer.
    pub fn as_slice(&self) -> &[u8] {
        &self.uint8[..self.x]
    }

    /// Returns a copy of the written bytes and resets the writer.
    pub fn flush(&mut self) -> Vec<u8> {
        let out = self.uint8[..self.x].to_vec();
        self.x = 0;
        out
    }

    /// Consumes the writer and returns the written bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.uint8.truncate(self.x);
        self.uint8
    }

    /// Writes raw bytes.
    pub fn buf(&mut self, data: &[u8]) {
        let len = data.len();
        self.ensure_capacity(len);
        self.uint8[self.x..self.x + len].copy_from_slice(data);
        self.x += len;
    }

    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.ensure_capacity(1);
        self.uint8[self.x] = val;
        self.x += 1;
    }

    #[inline]
    pub fn i8(&mut self, val: i8) {
        self.u8(val as u8);
    }

    #[inline]
    pub fn u16(&mut self, val: u16) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn i16(&mut self, val: i16) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn u32(&mut self, val: u32) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn i32(&mut self, val: i32) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn i64(&mut self, val: i64) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.buf(&val.to_le_bytes());
    }

    #[inline]
    pub fn f64(&mut self, val: f64) {
        self.buf(&val.to_le_bytes());
    }

    /// Writes the UTF-8 bytes of `s` (no length prefix).
    pub fn utf8(&mut self, s: &str) {
        self.buf(s.as_bytes());
    }

    /// Overwrites four already-written bytes at `pos` with `val`.
    pub fn rewrite_i32_at(&mut self, pos: usize, val: i32) -> Result<(), BufferError> {
        if pos + 4 > self.x {
            return Err(BufferError::Overflow);
        }
        self.uint8[pos..pos + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Overwrites one already-written byte at `pos` with `val`.
    pub fn rewrite_u8_at(&mut self, pos: usize, val: u8) -> Result<(), BufferError> {
        if pos >= self.x {
            return Err(BufferError::Overflow);
        }
        self.uint8[pos] = val;
        Ok(())
    }
}
