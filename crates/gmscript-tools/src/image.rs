//! image.rs - Conteneur `.gmf` : un programme compilé complet
//!
//! Format (little-endian) :
//! ```text
//! "GMPR" | version u16 | flags u16 | root u64
//! symbols : u32 n, n × (u32 len, bytes)
//! strings : u32 n, n × (u32 len, bytes)
//! sources : u32 n, n × (u32 id, name, text)
//! fonctions : u32 n, n × (u32 len, image FunctionInfo)
//! crc32 u32 (de tout ce qui précède)
//! ```
//! `flags & 1` : la racine est présente.

use std::fmt::Write as _;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use gmscript_compiler::Program;
use gmscript_core::disasm::disassemble_function;
use gmscript_core::{CoreError, FunctionInfo, ImageError, SourceEntry};

const FLAG_ROOT: u16 = 1;

/// Erreurs de lecture d'un conteneur.
#[derive(Debug, thiserror::Error)]
pub enum ProgramImageError {
    #[error("bad magic (expected GMPR)")]
    BadMagic,
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated container")]
    Truncated,
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
    #[error("invalid UTF-8 in string table")]
    Utf8,
    #[error("function #{index}: {source}")]
    Function { index: usize, source: ImageError },
}

/// Programme sérialisable : fonctions, tables d'interning, sources.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct ProgramImage {
    pub root: Option<u64>,
    pub symbols: Vec<String>,
    pub strings: Vec<String>,
    pub sources: Vec<SourceEntry>,
    pub functions: Vec<FunctionInfo>,
}

impl From<Program> for ProgramImage {
    fn from(p: Program) -> Self {
        Self {
            root: p.root,
            symbols: p.symbols,
            strings: p.strings,
            sources: p.sources.iter().cloned().collect(),
            functions: p.functions,
        }
    }
}

impl ProgramImage {
    pub const MAGIC: [u8; 4] = *b"GMPR";
    pub const VERSION: u16 = 1;

    pub fn function(&self, id: u64) -> Option<&FunctionInfo> { self.functions.iter().find(|f| f.id == id) }

    pub fn symbol(&self, id: u64) -> Option<&str> {
        usize::try_from(id).ok().and_then(|i| self.symbols.get(i)).map(String::as_str)
    }

    pub fn string(&self, id: u64) -> Option<&str> {
        usize::try_from(id).ok().and_then(|i| self.strings.get(i)).map(String::as_str)
    }

    /* ----------------------------- Écriture ----------------------------- */

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&Self::MAGIC);
        // Vec<u8> : les écritures byteorder ne peuvent pas échouer
        let _ = out.write_u16::<LittleEndian>(Self::VERSION);
        let _ = out.write_u16::<LittleEndian>(if self.root.is_some() { FLAG_ROOT } else { 0 });
        let _ = out.write_u64::<LittleEndian>(self.root.unwrap_or(0));

        put_strings(&mut out, &self.symbols);
        put_strings(&mut out, &self.strings);

        put_len(&mut out, self.sources.len());
        for s in &self.sources {
            let _ = out.write_u32::<LittleEndian>(s.id);
            put_str(&mut out, &s.name);
            put_str(&mut out, &s.text);
        }

        put_len(&mut out, self.functions.len());
        for f in &self.functions {
            let bytes = f.to_bytes();
            put_len(&mut out, bytes.len());
            out.extend_from_slice(&bytes);
        }

        let crc = crc32fast::hash(&out);
        let _ = out.write_u32::<LittleEndian>(crc);
        out
    }

    /* ------------------------------ Lecture ------------------------------ */

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProgramImageError> {
        if data.len() < 4 + 2 + 2 + 8 + 4 {
            return Err(ProgramImageError::Truncated);
        }
        if data[..4] != Self::MAGIC {
            return Err(ProgramImageError::BadMagic);
        }
        let (body, trailer) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(ProgramImageError::Checksum { stored, computed });
        }

        let mut r = Cursor::new(&body[4..]);
        let version = r.read_u16::<LittleEndian>().map_err(truncated)?;
        if version != Self::VERSION {
            return Err(ProgramImageError::UnsupportedVersion(version));
        }
        let flags = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let root = r.read_u64::<LittleEndian>().map_err(truncated)?;

        let symbols = get_strings(&mut r)?;
        let strings = get_strings(&mut r)?;

        let n = get_len(&mut r)?;
        let mut sources = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            let id = r.read_u32::<LittleEndian>().map_err(truncated)?;
            sources.push(SourceEntry { id, name: get_str(&mut r)?, text: get_str(&mut r)? });
        }

        let n = get_len(&mut r)?;
        let mut functions = Vec::with_capacity(n.min(1024));
        for index in 0..n {
            let len = get_len(&mut r)?;
            let bytes = get_bytes(&mut r, len)?;
            let f = FunctionInfo::from_bytes(&bytes).map_err(|source| ProgramImageError::Function { index, source })?;
            functions.push(f);
        }
        if r.position() as usize != body.len() - 4 {
            return Err(ProgramImageError::Truncated);
        }

        Ok(Self { root: (flags & FLAG_ROOT != 0).then_some(root), symbols, strings, sources, functions })
    }

    /* ------------------------------ Vues ------------------------------ */

    /// Résumé court (une ligne par fonction).
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "functions={} symbols={} strings={} sources={} root={}",
            self.functions.len(),
            self.symbols.len(),
            self.strings.len(),
            self.sources.len(),
            self.root.map_or_else(|| "-".to_owned(), |r| format!("fn#{r}")),
        );
        for f in &self.functions {
            let _ = writeln!(
                out,
                "  {:<16} id={} params={} locals={} stack={} bytes={}{}",
                f.display_name(),
                f.id,
                f.num_params,
                f.num_locals,
                f.max_stack,
                f.byte_code.len(),
                if f.line_info.is_some() { " debug" } else { "" },
            );
        }
        out
    }

    /// Désassemblage de toutes les fonctions, racine en dernier.
    pub fn disassemble(&self) -> Result<String, CoreError> {
        let mut out = String::new();
        for f in &self.functions {
            out.push_str(&disassemble_function(f)?);
            out.push('\n');
        }
        Ok(out)
    }
}

fn truncated(_: std::io::Error) -> ProgramImageError { ProgramImageError::Truncated }

fn put_len(out: &mut Vec<u8>, n: usize) {
    let _ = out.write_u32::<LittleEndian>(u32::try_from(n).unwrap_or(u32::MAX));
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn put_strings(out: &mut Vec<u8>, items: &[String]) {
    put_len(out, items.len());
    for s in items {
        put_str(out, s);
    }
}

fn get_len(r: &mut Cursor<&[u8]>) -> Result<usize, ProgramImageError> {
    let n = r.read_u32::<LittleEndian>().map_err(truncated)?;
    usize::try_from(n).map_err(|_| ProgramImageError::Truncated)
}

fn get_bytes(r: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, ProgramImageError> {
    let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
    if len > remaining {
        return Err(ProgramImageError::Truncated);
    }
    let mut buf = vec![0; len];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

fn get_str(r: &mut Cursor<&[u8]>) -> Result<String, ProgramImageError> {
    let len = get_len(r)?;
    String::from_utf8(get_bytes(r, len)?).map_err(|_| ProgramImageError::Utf8)
}

fn get_strings(r: &mut Cursor<&[u8]>) -> Result<Vec<String>, ProgramImageError> {
    let n = get_len(r)?;
    (0..n).map(|_| get_str(r)).collect()
}
