//! Byte streams shared by the emitter and the debug wire codec.
//!
//! All multi-byte values use the host's native byte order: bytecode and debug
//! messages never leave the process that produced them without going through
//! an explicit format (see [`crate::bytecode::function`] for stored images).

use byteorder::{ByteOrder, NativeEndian};

use crate::{CoreError, CoreResult};

/* ─────────────────────────── Écriture générique ─────────────────────────── */

/// Destination d'écriture séquentielle (buffer croissant ou fixe).
pub trait ByteSink {
    /// Écrit des octets bruts au curseur.
    fn put_bytes(&mut self, bytes: &[u8]) -> CoreResult<()>;

    /// Écrit un u32 natif.
    fn put_u32(&mut self, v: u32) -> CoreResult<()> {
        let mut b = [0u8; 4];
        NativeEndian::write_u32(&mut b, v);
        self.put_bytes(&b)
    }

    /// Écrit un i32 natif.
    fn put_i32(&mut self, v: i32) -> CoreResult<()> {
        let mut b = [0u8; 4];
        NativeEndian::write_i32(&mut b, v);
        self.put_bytes(&b)
    }

    /// Écrit une chaîne terminée par NUL, tronquée au premier NUL intérieur.
    fn put_cstr(&mut self, s: &str) -> CoreResult<()> {
        let bytes = s.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.put_bytes(&bytes[..end])?;
        self.put_bytes(&[0])
    }
}

/* ─────────────────────────── Buffer croissant ─────────────────────────── */

/// Growable byte buffer with a cursor.
///
/// Writes overwrite bytes under the cursor and extend the buffer past its end,
/// which is what backpatching relies on: `seek` back, write, `seek` forward.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl StreamBuffer {
    /// Empty buffer.
    pub fn new() -> Self { Self::default() }

    /// Empty buffer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), cursor: 0 }
    }

    /// Current cursor.
    pub fn tell(&self) -> usize { self.cursor }

    /// Moves the cursor and returns the previous position. Seeking past the end
    /// is allowed; the gap is zero-filled on the next write.
    pub fn seek(&mut self, pos: usize) -> usize {
        std::mem::replace(&mut self.cursor, pos)
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize { self.data.len() }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Written bytes.
    pub fn as_slice(&self) -> &[u8] { &self.data }

    /// Consumes the buffer.
    pub fn into_vec(self) -> Vec<u8> { self.data }

    /// Drops the content and rewinds.
    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Writes raw bytes at the cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    /// Writes a native-endian u32.
    pub fn write_u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        NativeEndian::write_u32(&mut b, v);
        self.write_bytes(&b);
    }

    /// Writes a native-endian f32.
    pub fn write_f32(&mut self, v: f32) {
        let mut b = [0u8; 4];
        NativeEndian::write_f32(&mut b, v);
        self.write_bytes(&b);
    }

    /// Writes a native-endian u64.
    pub fn write_u64(&mut self, v: u64) {
        let mut b = [0u8; 8];
        NativeEndian::write_u64(&mut b, v);
        self.write_bytes(&b);
    }

    /// Reserves `n` bytes filled with `fill` and returns their address.
    pub fn skip(&mut self, n: usize, fill: u8) -> usize {
        let at = self.cursor;
        let end = at + n;
        if self.data.len() < end {
            self.data.resize(end, fill);
        }
        self.data[at..end].fill(fill);
        self.cursor = end;
        at
    }
}

impl ByteSink for StreamBuffer {
    fn put_bytes(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.write_bytes(bytes);
        Ok(())
    }
}

/* ─────────────────────────── Buffer fixe ─────────────────────────── */

/// Fixed-capacity writer over a borrowed slice (e.g. a transport packet slot).
#[derive(Debug)]
pub struct FixedStream<'a> {
    data: &'a mut [u8],
    cursor: usize,
}

impl<'a> FixedStream<'a> {
    /// Wraps a slice; the cursor starts at 0.
    pub fn new(data: &'a mut [u8]) -> Self { Self { data, cursor: 0 } }

    /// Bytes written so far.
    pub fn tell(&self) -> usize { self.cursor }

    /// Capacity of the underlying slice.
    pub fn capacity(&self) -> usize { self.data.len() }

    /// Written prefix.
    pub fn written(&self) -> &[u8] { &self.data[..self.cursor] }
}

impl ByteSink for FixedStream<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            return Err(CoreError::Overflow {
                requested: bytes.len(),
                at: self.cursor,
                capacity: self.data.len(),
            });
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }
}

/* ─────────────────────────── Lecteur ─────────────────────────── */

/// Sequential reader over a byte slice (native byte order).
#[derive(Debug, Clone)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> StreamReader<'a> {
    /// Reader positioned at 0.
    pub fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }

    /// Current offset.
    pub fn offset(&self) -> usize { self.off }

    /// Moves to an absolute offset.
    pub fn set_offset(&mut self, off: usize) { self.off = off; }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }

    /// Reads `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n, at: self.off });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    /// Reads a native-endian u32.
    pub fn read_u32(&mut self) -> CoreResult<u32> {
        Ok(NativeEndian::read_u32(self.read_bytes(4)?))
    }

    /// Reads a native-endian i32.
    pub fn read_i32(&mut self) -> CoreResult<i32> {
        Ok(NativeEndian::read_i32(self.read_bytes(4)?))
    }

    /// Reads a native-endian f32.
    pub fn read_f32(&mut self) -> CoreResult<f32> {
        Ok(NativeEndian::read_f32(self.read_bytes(4)?))
    }

    /// Reads a native-endian u64.
    pub fn read_u64(&mut self) -> CoreResult<u64> {
        Ok(NativeEndian::read_u64(self.read_bytes(8)?))
    }

    /// Reads a NUL-terminated UTF-8 string (terminator consumed).
    pub fn read_cstr(&mut self) -> CoreResult<&'a str> {
        let start = self.off;
        let rest = &self.data[start.min(self.data.len())..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(CoreError::Unterminated { at: start })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| CoreError::InvalidUtf8)?;
        self.off = start + nul + 1;
        Ok(s)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn seek_and_overwrite_keeps_tail() {
        let mut s = StreamBuffer::new();
        s.write_u32(1);
        let hole = s.skip(4, 0xAA);
        s.write_u32(3);
        assert_eq!(hole, 4);
        assert_eq!(&s.as_slice()[4..8], &[0xAA; 4]);

        let prev = s.seek(hole);
        s.write_u32(2);
        assert_eq!(s.seek(prev), 8);
        assert_eq!(s.len(), 12);

        let mut r = StreamReader::new(s.as_slice());
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_u32().unwrap(), 2);
        assert_eq!(r.read_u32().unwrap(), 3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn cstr_and_scalars() -> CoreResult<()> {
        let mut s = StreamBuffer::new();
        s.put_i32(-7)?;
        s.put_cstr("hello")?;
        s.write_f32(2.5);
        s.write_u64(u64::MAX - 1);

        let mut r = StreamReader::new(s.as_slice());
        assert_eq!(r.read_i32()?, -7);
        assert_eq!(r.read_cstr()?, "hello");
        assert_eq!(r.read_f32()?, 2.5);
        assert_eq!(r.read_u64()?, u64::MAX - 1);
        Ok(())
    }

    #[test]
    fn cstr_stops_at_interior_nul() -> CoreResult<()> {
        let mut s = StreamBuffer::new();
        s.put_cstr("a\0b")?;
        s.put_u32(5)?;
        assert_eq!(s.as_slice().len(), 2 + 4);

        let mut r = StreamReader::new(s.as_slice());
        assert_eq!(r.read_cstr()?, "a");
        assert_eq!(r.read_u32()?, 5);
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn reader_reports_eof_and_missing_terminator() {
        let mut r = StreamReader::new(&[1, 2]);
        assert_eq!(r.read_u32(), Err(CoreError::UnexpectedEof { needed: 4, at: 0 }));
        let mut r = StreamReader::new(b"abc");
        assert_eq!(r.read_cstr(), Err(CoreError::Unterminated { at: 0 }));
    }

    #[test]
    fn fixed_stream_refuses_overflow() {
        let mut slot = [0u8; 6];
        let mut w = FixedStream::new(&mut slot);
        assert!(w.put_u32(9).is_ok());
        assert_eq!(
            w.put_u32(10),
            Err(CoreError::Overflow { requested: 4, at: 4, capacity: 6 })
        );
        assert_eq!(w.tell(), 4);
    }
}
