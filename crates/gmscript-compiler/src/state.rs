//! Per-function compilation state.

use gmscript_core::{ByteCodeGen, EmitHook, FunctionInfo, LineInfo, Opcode};

use crate::labels::{LabelArena, LabelError, LabelId, LoopContext};
use crate::vars::VariableTable;

/// Emit hook recording `(address, current line)` for every instruction.
#[derive(Debug, Clone, Default)]
pub struct LineRecorder {
    enabled: bool,
    line: u32,
    entries: Vec<LineInfo>,
}

impl LineRecorder {
    /// Recorder; records nothing when `enabled` is false.
    pub fn new(enabled: bool) -> Self { Self { enabled, ..Self::default() } }

    /// Line attributed to the next emissions.
    pub fn set_line(&mut self, line: u32) { self.line = line; }

    /// Current line.
    pub fn line(&self) -> u32 { self.line }

    /// Line table: sorted by address, consecutive same-line entries collapsed.
    pub fn finish(mut self) -> Vec<LineInfo> {
        self.entries.sort_by_key(|e| e.address);
        self.entries.dedup_by(|next, prev| next.line == prev.line || next.address == prev.address);
        self.entries
    }
}

impl EmitHook for LineRecorder {
    fn on_emit(&mut self, address: u32) {
        if self.enabled {
            self.entries.push(LineInfo { address, line: self.line });
        }
    }
}

/// State of the function being generated.
#[derive(Debug)]
pub struct FunctionState {
    /// Function id.
    pub id: u64,
    /// Best-effort name.
    pub debug_name: Option<String>,
    /// Output.
    pub code: ByteCodeGen<LineRecorder>,
    /// Names.
    pub vars: VariableTable,
    /// Forward branches.
    pub labels: LabelArena,
    /// Enclosing loops, innermost last.
    pub loops: Vec<LoopContext>,
}

impl FunctionState {
    /// Fresh state.
    pub fn new(id: u64, debug_name: Option<String>, debug: bool) -> Self {
        Self {
            id,
            debug_name,
            code: ByteCodeGen::with_hook(LineRecorder::new(debug)),
            vars: VariableTable::new(),
            labels: LabelArena::new(),
            loops: Vec::new(),
        }
    }

    /// Last line seen.
    pub fn current_line(&self) -> u32 { self.code.hook().line() }

    /// Emits a `line` marker for `line` and attributes the following code to it.
    pub fn mark_line(&mut self, line: u32) {
        self.code.hook_mut().set_line(line);
        self.code.emit(Opcode::Line);
    }

    /// Reserves a branch.
    pub fn reserve(&mut self, op: Opcode) -> LabelId { self.labels.reserve(&mut self.code, op) }

    /// Resolves `label` to the cursor.
    pub fn resolve_here(&mut self, label: LabelId) -> Result<(), LabelError> {
        self.labels.resolve_here(&mut self.code, label)
    }

    /// Resolves every label of `chain` to `target`.
    pub fn resolve_all(&mut self, chain: &[LabelId], target: u32) -> Result<(), LabelError> {
        chain.iter().try_for_each(|&l| self.labels.resolve(&mut self.code, l, target))
    }

    /// Emits `push-int` using the 0/1 fast paths.
    pub fn push_int(&mut self, v: i32) {
        match v {
            0 => self.code.emit(Opcode::PushInt0),
            1 => self.code.emit(Opcode::PushInt1),
            _ => self.code.emit32(Opcode::PushInt, v as u32),
        }
    }

    /// Assembles the metadata. Fails when a label was never resolved.
    pub fn finish(self, root: bool, debug: bool) -> Result<FunctionInfo, String> {
        let pending = self.labels.unresolved();
        if pending > 0 {
            return Err(format!("{pending} unresolved label(s) in function {}", self.id));
        }
        let (byte_code, max_stack, lines) = self.code.into_parts();
        Ok(FunctionInfo {
            id: self.id,
            root,
            byte_code,
            num_params: self.vars.num_params(),
            num_locals: self.vars.num_locals(),
            max_stack: u32::try_from(max_stack).unwrap_or(0),
            debug_name: self.debug_name,
            symbols: debug.then(|| self.vars.symbols()),
            line_info: debug.then(|| lines.finish()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_table_collapses_runs() {
        let mut s = FunctionState::new(0, None, true);
        s.mark_line(1);
        s.push_int(1);
        s.code.emit32(Opcode::SetLocal, 0);
        s.mark_line(2);
        s.push_int(7);
        s.code.emit(Opcode::Pop);
        s.code.emit(Opcode::Return);
        let info = s.finish(true, true).unwrap();
        assert_eq!(
            info.line_info,
            Some(vec![LineInfo { address: 0, line: 1 }, LineInfo { address: 16, line: 2 }])
        );
        assert_eq!(info.max_stack, 1);
    }

    #[test]
    fn unresolved_label_fails_finish() {
        let mut s = FunctionState::new(3, None, false);
        s.reserve(Opcode::Branch);
        assert!(s.finish(false, false).is_err());
    }
}
