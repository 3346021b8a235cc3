//! Structural validations reused by tests and tooling.

use std::collections::BTreeSet;

use super::disasm::{instructions, Instruction};
use super::function::FunctionInfo;
use crate::{CoreError, CoreResult};

/// Result of a linear stack replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackReport {
    /// Highest depth reached.
    pub max_depth: i32,
    /// Depth after the last instruction.
    pub final_depth: i32,
}

fn boundaries(code: &[u8]) -> CoreResult<(Vec<Instruction>, BTreeSet<u32>)> {
    let ins = instructions(code).collect::<CoreResult<Vec<_>>>()?;
    let starts = ins.iter().map(|i| i.address).collect();
    Ok((ins, starts))
}

/// Replays the code linearly, applying every stack effect in order.
///
/// Fails if the depth ever goes negative. `call` is followed the same way the
/// generator tracks it: its operand-dependent effect.
pub fn replay_stack(code: &[u8]) -> CoreResult<StackReport> {
    let mut report = StackReport::default();
    let mut depth = 0i32;
    for ins in instructions(code) {
        let ins = ins?;
        depth += ins.opcode.stack_effect(ins.raw32());
        if depth < 0 {
            return Err(CoreError::corrupted(format!(
                "stack underflow at {} ({})",
                ins.address,
                ins.opcode.mnemonic()
            )));
        }
        report.max_depth = report.max_depth.max(depth);
    }
    report.final_depth = depth;
    Ok(report)
}

/// Every branch target lies on an instruction boundary or at the end of code.
pub fn check_branch_targets(code: &[u8]) -> CoreResult<()> {
    let (ins, starts) = boundaries(code)?;
    let end = code.len() as u64;
    for i in ins.iter().filter(|i| i.opcode.is_branch()) {
        let Some(target) = i.target() else { continue };
        let on_boundary = u32::try_from(target).is_ok_and(|t| starts.contains(&t));
        if target != end && !on_boundary {
            return Err(CoreError::corrupted(format!(
                "branch at {} targets {target}, not an instruction boundary",
                i.address
            )));
        }
    }
    Ok(())
}

/// Line table addresses strictly increase and sit on instruction boundaries.
pub fn check_line_table(info: &FunctionInfo) -> CoreResult<()> {
    let Some(lines) = &info.line_info else { return Ok(()) };
    let (_, starts) = boundaries(&info.byte_code)?;
    for pair in lines.windows(2) {
        if pair[0].address >= pair[1].address {
            return Err(CoreError::corrupted(format!(
                "line table not strictly increasing at address {}",
                pair[1].address
            )));
        }
    }
    if let Some(l) = lines.iter().find(|l| !starts.contains(&l.address)) {
        return Err(CoreError::corrupted(format!(
            "line {} points inside an instruction ({})",
            l.line, l.address
        )));
    }
    Ok(())
}

/// Full check of a compiled function: decodable code, sound stack replay
/// matching `max_stack`, branch targets, line table and symbol count.
pub fn validate_function(info: &FunctionInfo) -> CoreResult<StackReport> {
    let report = replay_stack(&info.byte_code)?;
    if u32::try_from(report.max_depth).ok() != Some(info.max_stack) {
        return Err(CoreError::corrupted(format!(
            "max_stack {} but replay reaches {}",
            info.max_stack, report.max_depth
        )));
    }
    check_branch_targets(&info.byte_code)?;
    check_line_table(info)?;
    if let Some(symbols) = &info.symbols {
        let slots = (info.num_params + info.num_locals) as usize;
        if symbols.len() != slots {
            return Err(CoreError::corrupted(format!(
                "{} symbols for {slots} slots",
                symbols.len()
            )));
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ByteCodeGen, LineInfo, Opcode};
    use pretty_assertions::assert_eq;

    #[test]
    fn replay_reports_depths() {
        let mut g = ByteCodeGen::new();
        g.emit(Opcode::PushInt1);
        g.emit(Opcode::Dup);
        g.emit(Opcode::Add);
        g.emit(Opcode::Pop);
        assert_eq!(replay_stack(g.code()).unwrap(), StackReport { max_depth: 2, final_depth: 0 });

        let mut bad = ByteCodeGen::new();
        bad.emit(Opcode::Pop);
        assert!(replay_stack(bad.code()).is_err());
    }

    #[test]
    fn branch_into_immediate_is_rejected() {
        let mut g = ByteCodeGen::new();
        g.emit_ptr(Opcode::Branch, 12);
        g.emit(Opcode::Return);
        assert!(check_branch_targets(g.code()).is_ok());

        let mut g = ByteCodeGen::new();
        g.emit_ptr(Opcode::Branch, 4);
        assert!(check_branch_targets(g.code()).is_err());
    }

    #[test]
    fn function_validation() {
        let mut g = ByteCodeGen::new();
        g.emit(Opcode::Line);
        g.emit(Opcode::PushInt0);
        g.emit(Opcode::ReturnValue);
        let mut info = FunctionInfo {
            byte_code: g.code().to_vec(),
            max_stack: 1,
            line_info: Some(vec![LineInfo { address: 0, line: 1 }, LineInfo { address: 8, line: 2 }]),
            ..FunctionInfo::default()
        };
        assert!(validate_function(&info).is_ok());

        info.line_info = Some(vec![LineInfo { address: 2, line: 1 }]);
        assert!(validate_function(&info).is_err());

        info.line_info = None;
        info.max_stack = 3;
        assert!(validate_function(&info).is_err());
    }
}
