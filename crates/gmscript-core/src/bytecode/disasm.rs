//! Textual disassembly. Pure functions over the opcode table.

use std::fmt::{self, Write};

use super::function::FunctionInfo;
use super::opcode::{unpack_foreach, Opcode, OperandKind};
use crate::stream::StreamReader;
use crate::{CoreError, CoreResult};

/// Decoded immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No immediate.
    None,
    /// 32-bit integer.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// Pointer-width integer.
    Ptr(u64),
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    /// Byte address.
    pub address: u32,
    /// Opcode.
    pub opcode: Opcode,
    /// Immediate.
    pub operand: Operand,
}

impl Instruction {
    /// Address of the next instruction.
    pub fn next_address(&self) -> u32 { self.address + self.opcode.encoded_len() as u32 }

    /// Raw 32-bit operand as used by [`Opcode::stack_effect`].
    pub fn raw32(&self) -> u32 {
        match self.operand {
            Operand::Int(v) => v as u32,
            _ => 0,
        }
    }

    /// Branch target, for branch instructions.
    pub fn target(&self) -> Option<u64> {
        match (self.opcode.is_branch(), self.operand) {
            (true, Operand::Ptr(t)) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04} {}", self.address, self.opcode.mnemonic())?;
        match (self.opcode, self.operand) {
            (Opcode::Foreach, Operand::Int(v)) => {
                let (k, v) = unpack_foreach(v as u32);
                write!(f, " k{k} v{v}")
            }
            (op, Operand::Ptr(t)) if op.is_branch() => write!(f, " @{t:04}"),
            (_, Operand::Int(v)) => write!(f, " {v}"),
            (_, Operand::Float(v)) => write!(f, " {v:?}"),
            (_, Operand::Ptr(p)) => write!(f, " #{p}"),
            (_, Operand::None) => Ok(()),
        }
    }
}

/// Decodes the instruction at `address`.
pub fn decode_at(code: &[u8], address: usize) -> CoreResult<Instruction> {
    let mut r = StreamReader::new(code);
    r.set_offset(address);
    let raw = r.read_u32()?;
    let opcode = Opcode::from_tag(raw).ok_or(CoreError::UnknownOpcode { raw, at: address })?;
    let operand = match opcode.operand() {
        OperandKind::None => Operand::None,
        OperandKind::Int32 => Operand::Int(r.read_i32()?),
        OperandKind::Float32 => Operand::Float(r.read_f32()?),
        OperandKind::Ptr => Operand::Ptr(r.read_u64()?),
    };
    Ok(Instruction { address: address as u32, opcode, operand })
}

/// Iterator over the instructions of a code buffer. Stops after the first error.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a [u8],
    at: usize,
    failed: bool,
}

impl Iterator for Instructions<'_> {
    type Item = CoreResult<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at >= self.code.len() {
            return None;
        }
        let res = decode_at(self.code, self.at);
        match &res {
            Ok(ins) => self.at = ins.next_address() as usize,
            Err(_) => self.failed = true,
        }
        Some(res)
    }
}

/// Iterates over `code`.
pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions { code, at: 0, failed: false }
}

/// Decodes the whole buffer.
pub fn decode(code: &[u8]) -> CoreResult<Vec<Instruction>> { instructions(code).collect() }

/// One line per instruction.
pub fn disassemble(code: &[u8]) -> CoreResult<String> {
    let mut out = String::new();
    for ins in instructions(code) {
        let _ = writeln!(out, "{}", ins?);
    }
    Ok(out)
}

/// Disassembly with header, symbols and a line column when available.
pub fn disassemble_function(info: &FunctionInfo) -> CoreResult<String> {
    let mut out = String::new();
    let _ = writeln!(out, "== {info} ==");
    if let Some(symbols) = &info.symbols {
        for (slot, name) in symbols.iter().enumerate() {
            let kind = if (slot as u32) < info.num_params { "param" } else { "local" };
            let _ = writeln!(out, ";; {kind} {slot}: {name}");
        }
    }
    for ins in instructions(&info.byte_code) {
        let ins = ins?;
        match info.line_for_address(ins.address) {
            Some(line) => {
                let _ = writeln!(out, "{line:4} | {ins}");
            }
            None => {
                let _ = writeln!(out, "     | {ins}");
            }
        }
    }
    Ok(out)
}
