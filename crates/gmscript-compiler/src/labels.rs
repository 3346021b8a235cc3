//! Forward branch labels.
//!
//! `reserve` emits a branch with its target left blank and returns an index
//! into the arena; `resolve` seeks back, writes the target and restores the
//! cursor. Each label is resolved exactly once.

use smallvec::SmallVec;

use gmscript_core::{ByteCodeGen, EmitHook, Opcode};

/// Index into a [`LabelArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(u32);

#[derive(Debug, Clone, Copy)]
struct Label {
    operand_at: u32,
    target: Option<u32>,
}

/// Label misuse. Always a generator bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    /// Index out of the arena.
    #[error("unknown label {0}")]
    Unknown(u32),
    /// Second resolution of the same label.
    #[error("label {label} already resolved to {target}")]
    AlreadyResolved {
        /// Label index.
        label: u32,
        /// First target.
        target: u32,
    },
}

/// Reserved branch immediates of one function.
#[derive(Debug, Clone, Default)]
pub struct LabelArena {
    labels: Vec<Label>,
}

impl LabelArena {
    /// Empty arena.
    pub fn new() -> Self { Self::default() }

    /// Emits `op` with a blank target.
    pub fn reserve<H: EmitHook>(&mut self, code: &mut ByteCodeGen<H>, op: Opcode) -> LabelId {
        debug_assert!(op.is_branch(), "{} is not a branch", op.mnemonic());
        let operand_at = code.emit_reserved(op, 0);
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label { operand_at, target: None });
        id
    }

    /// Patches `label` with `target`.
    pub fn resolve<H: EmitHook>(
        &mut self,
        code: &mut ByteCodeGen<H>,
        label: LabelId,
        target: u32,
    ) -> Result<(), LabelError> {
        let slot = self.labels.get_mut(label.0 as usize).ok_or(LabelError::Unknown(label.0))?;
        if let Some(first) = slot.target {
            return Err(LabelError::AlreadyResolved { label: label.0, target: first });
        }
        slot.target = Some(target);
        let back = code.seek(slot.operand_at);
        code.write_ptr(u64::from(target));
        code.seek(back);
        Ok(())
    }

    /// Patches `label` with the current cursor.
    pub fn resolve_here<H: EmitHook>(
        &mut self,
        code: &mut ByteCodeGen<H>,
        label: LabelId,
    ) -> Result<(), LabelError> {
        let here = code.tell();
        self.resolve(code, label, here)
    }

    /// Labels still blank.
    pub fn unresolved(&self) -> usize { self.labels.iter().filter(|l| l.target.is_none()).count() }

    /// Reserved labels.
    pub fn len(&self) -> usize { self.labels.len() }

    /// True when nothing was reserved.
    pub fn is_empty(&self) -> bool { self.labels.is_empty() }
}

/// Patch chains of one loop.
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    /// `break` branches, resolved to the loop exit.
    pub breaks: SmallVec<[LabelId; 4]>,
    /// `continue` branches, resolved to the continue target.
    pub continues: SmallVec<[LabelId; 4]>,
}
