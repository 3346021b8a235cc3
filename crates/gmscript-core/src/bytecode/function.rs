//! Per-function metadata produced by the compiler, plus a compact binary
//! image (`to_bytes` / `from_bytes`) for storage and tooling.
//!
//! Image layout (little-endian):
//!
//! ```text
//! "GMFN" version:u16 flags:u8 reserved:u8
//! id:u64 params:u32 locals:u32 max_stack:u32
//! [name]                      (flag NAME)
//! code_len:u32 code
//! [count:u32 symbols]         (flag SYMBOLS)
//! [count:u32 (addr,line)*]    (flag LINES)
//! crc32:u32
//! ```
//! Strings are `len:u32` + UTF-8. The bytecode itself keeps native order.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const MAGIC: &[u8; 4] = b"GMFN";
const IMAGE_VERSION: u16 = 1;

const FLAG_ROOT: u8 = 1 << 0;
const FLAG_SYMBOLS: u8 = 1 << 1;
const FLAG_LINES: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;

/// One entry of a function's line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineInfo {
    /// Byte address of the first instruction of the line.
    pub address: u32,
    /// Source line.
    pub line: u32,
}

/// Metadata of one compiled function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FunctionInfo {
    /// Function id allocated by the code generation hooks.
    pub id: u64,
    /// True for the implicit top-level function of a unit.
    pub root: bool,
    /// Encoded instructions.
    pub byte_code: Vec<u8>,
    /// Parameter count.
    pub num_params: u32,
    /// Local count, parameters excluded.
    pub num_locals: u32,
    /// Highest evaluation-stack depth reached.
    pub max_stack: u32,
    /// Best-effort name.
    pub debug_name: Option<String>,
    /// Slot names (parameters first), debug builds only.
    pub symbols: Option<Vec<String>>,
    /// Address → line table, debug builds only.
    pub line_info: Option<Vec<LineInfo>>,
}

/// Errors raised while decoding an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// Payload does not match the expected layout.
    #[error("format error: {0}")]
    Format(&'static str),
    /// CRC32 trailer mismatch.
    #[error("hash mismatch (crc32): expected=0x{expected:08X}, found=0x{found:08X}")]
    HashMismatch {
        /// CRC32 recomputed from the payload.
        expected: u32,
        /// CRC32 read from the trailer.
        found: u32,
    },
}

impl FunctionInfo {
    /// Line covering `address` (last entry whose address is ≤ `address`).
    pub fn line_for_address(&self, address: u32) -> Option<u32> {
        let lines = self.line_info.as_deref()?;
        let idx = lines.partition_point(|l| l.address <= address);
        idx.checked_sub(1).map(|i| lines[i].line)
    }

    /// Address of the first line-table entry for `line` (the `line` marker
    /// in debug builds).
    pub fn line_marker_address(&self, line: u32) -> Option<u32> {
        self.line_info.as_deref()?.iter().find(|l| l.line == line).map(|l| l.address)
    }

    /// Name of a local slot.
    pub fn symbol(&self, slot: u32) -> Option<&str> {
        self.symbols.as_deref()?.get(slot as usize).map(String::as_str)
    }

    /// Display name (`debug_name` or `fn#id`).
    pub fn display_name(&self) -> String {
        self.debug_name.clone().unwrap_or_else(|| format!("fn#{}", self.id))
    }

    /// Hash (crc32 + length) of the image, used by tools for cache keys.
    pub fn compute_hash(&self) -> u64 {
        let bytes = self.to_bytes();
        (u64::from(crc32fast::hash(&bytes)) << 32) | (bytes.len() as u64 & 0xFFFF_FFFF)
    }

    /// Encodes the image.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_code.len() + 64);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());

        let mut flags = 0u8;
        if self.root {
            flags |= FLAG_ROOT;
        }
        if self.symbols.is_some() {
            flags |= FLAG_SYMBOLS;
        }
        if self.line_info.is_some() {
            flags |= FLAG_LINES;
        }
        if self.debug_name.is_some() {
            flags |= FLAG_NAME;
        }
        out.push(flags);
        out.push(0); // reserved

        out.extend_from_slice(&self.id.to_le_bytes());
        write_u32(&mut out, self.num_params);
        write_u32(&mut out, self.num_locals);
        write_u32(&mut out, self.max_stack);

        if let Some(name) = &self.debug_name {
            write_str(&mut out, name);
        }
        write_len(&mut out, self.byte_code.len());
        out.extend_from_slice(&self.byte_code);

        if let Some(symbols) = &self.symbols {
            write_len(&mut out, symbols.len());
            for s in symbols {
                write_str(&mut out, s);
            }
        }
        if let Some(lines) = &self.line_info {
            write_len(&mut out, lines.len());
            for l in lines {
                write_u32(&mut out, l.address);
                write_u32(&mut out, l.line);
            }
        }

        let crc = crc32fast::hash(&out);
        write_u32(&mut out, crc);
        out
    }

    /// Decodes an image produced by [`FunctionInfo::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        if data.len() < MAGIC.len() + 2 + 2 + 8 + 12 + 4 + 4 {
            return Err(ImageError::Format("too short"));
        }
        let (payload, trailer) = data.split_at(data.len() - 4);
        let found = Cursor::new(trailer).read_u32::<LittleEndian>().map_err(eof)?;
        let expected = crc32fast::hash(payload);
        if expected != found {
            return Err(ImageError::HashMismatch { expected, found });
        }
        if &payload[..4] != MAGIC {
            return Err(ImageError::Format("bad magic"));
        }

        let mut rd = Cursor::new(&payload[4..]);
        let version = rd.read_u16::<LittleEndian>().map_err(eof)?;
        if version != IMAGE_VERSION {
            return Err(ImageError::Format("unsupported version"));
        }
        let flags = rd.read_u8().map_err(eof)?;
        let _reserved = rd.read_u8().map_err(eof)?;

        let mut info = Self {
            id: rd.read_u64::<LittleEndian>().map_err(eof)?,
            root: flags & FLAG_ROOT != 0,
            num_params: rd.read_u32::<LittleEndian>().map_err(eof)?,
            num_locals: rd.read_u32::<LittleEndian>().map_err(eof)?,
            max_stack: rd.read_u32::<LittleEndian>().map_err(eof)?,
            ..Self::default()
        };
        if flags & FLAG_NAME != 0 {
            info.debug_name = Some(read_string(&mut rd)?);
        }
        info.byte_code = read_vec(&mut rd)?;

        if flags & FLAG_SYMBOLS != 0 {
            let n = rd.read_u32::<LittleEndian>().map_err(eof)?;
            let mut symbols = Vec::new();
            for _ in 0..n {
                symbols.push(read_string(&mut rd)?);
            }
            info.symbols = Some(symbols);
        }
        if flags & FLAG_LINES != 0 {
            let n = rd.read_u32::<LittleEndian>().map_err(eof)?;
            let mut lines = Vec::new();
            for _ in 0..n {
                let address = rd.read_u32::<LittleEndian>().map_err(eof)?;
                let line = rd.read_u32::<LittleEndian>().map_err(eof)?;
                lines.push(LineInfo { address, line });
            }
            info.line_info = Some(lines);
        }

        if rd.position() as usize != rd.get_ref().len() {
            return Err(ImageError::Format("trailing bytes"));
        }
        Ok(info)
    }
}

impl fmt::Display for FunctionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id={}, root={}, params={}, locals={}, max_stack={}, bytes={})",
            self.display_name(),
            self.id,
            self.root,
            self.num_params,
            self.num_locals,
            self.max_stack,
            self.byte_code.len()
        )
    }
}

fn eof(_: std::io::Error) -> ImageError { ImageError::Format("unexpected eof") }

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_len(buf: &mut Vec<u8>, len: usize) {
    write_u32(buf, u32::try_from(len).unwrap_or(u32::MAX));
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_len(buf, s.len());
    buf.extend_from_slice(s.as_bytes());
}

fn read_vec(rd: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ImageError> {
    let len = rd.read_u32::<LittleEndian>().map_err(eof)? as usize;
    let left = rd.get_ref().len().saturating_sub(rd.position() as usize);
    if len > left {
        return Err(ImageError::Format("slice eof"));
    }
    let mut bytes = vec![0; len];
    rd.read_exact(&mut bytes).map_err(eof)?;
    Ok(bytes)
}

fn read_string(rd: &mut Cursor<&[u8]>) -> Result<String, ImageError> {
    String::from_utf8(read_vec(rd)?).map_err(|_| ImageError::Format("utf8"))
}
