//! Bytecode emitter with live stack-depth tracking.
//!
//! Emission never fails: the underlying [`StreamBuffer`] grows on demand.
//! Each emission calls the [`EmitHook`] with the address the instruction is
//! about to occupy, then applies the opcode's stack delta, then writes.

use super::opcode::{Opcode, PTR_SIZE};
use crate::stream::StreamBuffer;

/// Callback invoked before every instruction is written.
pub trait EmitHook {
    /// `address` is the cursor position of the instruction being emitted.
    fn on_emit(&mut self, address: u32);
}

impl<F: FnMut(u32)> EmitHook for F {
    fn on_emit(&mut self, address: u32) { self(address); }
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoHook;

impl EmitHook for NoHook {
    fn on_emit(&mut self, _address: u32) {}
}

/// Append/seek/skip bytecode writer.
#[derive(Debug, Default)]
pub struct ByteCodeGen<H: EmitHook = NoHook> {
    stream: StreamBuffer,
    depth: i32,
    max_depth: i32,
    hook: H,
}

impl ByteCodeGen<NoHook> {
    /// Emitter without callback.
    pub fn new() -> Self { Self::with_hook(NoHook) }
}

impl<H: EmitHook> ByteCodeGen<H> {
    /// Emitter calling `hook` on every instruction.
    pub fn with_hook(hook: H) -> Self {
        Self { stream: StreamBuffer::new(), depth: 0, max_depth: 0, hook }
    }

    /// Registered callback.
    pub fn hook(&self) -> &H { &self.hook }

    /// Registered callback (mutable).
    pub fn hook_mut(&mut self) -> &mut H { &mut self.hook }

    /// Cursor address.
    pub fn tell(&self) -> u32 { addr(self.stream.tell()) }

    fn begin(&mut self, op: Opcode, operand: u32) {
        let at = self.tell();
        self.hook.on_emit(at);
        self.depth += op.stack_effect(operand);
        self.max_depth = self.max_depth.max(self.depth);
        self.stream.write_u32(op.tag());
    }

    /// Emits an instruction without immediate.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.encoded_len(), 4, "{} expects an operand", op.mnemonic());
        self.begin(op, 0);
    }

    /// Emits an instruction with a 32-bit integer immediate.
    pub fn emit32(&mut self, op: Opcode, operand: u32) {
        self.begin(op, operand);
        self.stream.write_u32(operand);
    }

    /// Emits an instruction with a float immediate.
    pub fn emit_float(&mut self, op: Opcode, operand: f32) {
        self.begin(op, 0);
        self.stream.write_f32(operand);
    }

    /// Emits an instruction with a pointer-width immediate.
    pub fn emit_ptr(&mut self, op: Opcode, operand: u64) {
        self.begin(op, 0);
        self.stream.write_u64(operand);
    }

    /// Emits `op` with its pointer immediate left unwritten (filled with `fill`).
    /// Returns the address of the immediate, to be patched with [`Self::write_ptr`].
    pub fn emit_reserved(&mut self, op: Opcode, fill: u8) -> u32 {
        self.begin(op, 0);
        self.skip(PATCH_SIZE, fill)
    }

    /// Reserves `n` bytes filled with `fill`; depth is untouched.
    /// Returns the address of the reserved region.
    pub fn skip(&mut self, n: u32, fill: u8) -> u32 {
        addr(self.stream.skip(n as usize, fill))
    }

    /// Moves the cursor and returns the previous address.
    pub fn seek(&mut self, address: u32) -> u32 {
        addr(self.stream.seek(address as usize))
    }

    /// Writes a raw pointer-width value at the cursor (backpatching).
    /// No callback, no depth change.
    pub fn write_ptr(&mut self, value: u64) {
        self.stream.write_u64(value);
    }

    /// Current tracked depth.
    pub fn depth(&self) -> i32 { self.depth }

    /// Highest depth observed so far.
    pub fn max_depth(&self) -> i32 { self.max_depth }

    /// Overrides the tracked depth (after `call`, at join points).
    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
        self.max_depth = self.max_depth.max(depth);
    }

    /// Bytes written so far.
    pub fn code(&self) -> &[u8] { self.stream.as_slice() }

    /// Consumes the emitter: bytecode, max depth, hook.
    pub fn into_parts(self) -> (Vec<u8>, i32, H) {
        (self.stream.into_vec(), self.max_depth, self.hook)
    }
}

/// Size of a reserved branch immediate.
pub const PATCH_SIZE: u32 = PTR_SIZE as u32;

fn addr(pos: usize) -> u32 { u32::try_from(pos).unwrap_or(u32::MAX) }
