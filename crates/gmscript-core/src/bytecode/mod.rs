//! Bytecode layer: instruction set, emitter, function metadata, disassembly
//! and structural validation.

/// Closed opcode table.
pub mod opcode;
/// Append/seek/skip writer with depth tracking.
pub mod emitter;
/// Function metadata and binary image.
pub mod function;
pub mod disasm;
pub mod helpers;

pub use disasm::{Instruction, Operand};
pub use emitter::{ByteCodeGen, EmitHook, NoHook, PATCH_SIZE};
pub use function::{FunctionInfo, ImageError, LineInfo};
pub use opcode::{pack_foreach, unpack_foreach, Opcode, OperandKind, PTR_SIZE, TAG_SIZE};
