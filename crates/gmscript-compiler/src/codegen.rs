//! AST → bytecode lowering.
//!
//! One recursive dispatch over the node sum type. The function being
//! generated is `self.cur`; entering a function literal swaps in a fresh
//! state and restores the enclosing one on every exit path (`in_function`).
//! Loops push a [`LoopContext`] on the current function the same way
//! (`in_loop`). Errors are recorded as diagnostics and unwind with [`Abort`].

use gmscript_ast::{
    Constant, Declaration, Expression, Node, NodeFlags, NodeKind, Operator, Statement, StorageClass,
};
use gmscript_core::{pack_foreach, FunctionInfo, Opcode};

use crate::labels::{LabelError, LoopContext};
use crate::state::FunctionState;
use crate::vars::{Declared, Storage};
use crate::{CodeGenHooks, CompilerOptions, Diagnostic, ReceiverPolicy};

/// Hidden local receiving the key of a `foreach` without key variable.
const HIDDEN_KEY: &str = "(key)";

/// Generation aborted; the reason is already in the diagnostics.
#[derive(Debug)]
pub(crate) struct Abort;

type GenResult<T = ()> = Result<T, Abort>;

/// Output of one unit.
pub(crate) struct Generated {
    pub root: Option<u64>,
    pub functions: Vec<FunctionInfo>,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) fn generate(options: &CompilerOptions, hooks: &mut dyn CodeGenHooks, unit: &Node) -> Generated {
    let root_id = hooks.function_id();
    let mut gen = CodeGen {
        options,
        cur: FunctionState::new(root_id, Some(options.root_name.clone()), options.debug),
        hooks,
        finished: Vec::new(),
        diagnostics: Vec::new(),
    };

    let body = gen.gen_node(unit).map(|()| gen.cur.code.emit(Opcode::Return));
    let placeholder = FunctionState::new(root_id, None, false);
    let state = std::mem::replace(&mut gen.cur, placeholder);
    let root = body.and_then(|()| gen.close(state, true, unit.line));

    let ok = root.is_ok();
    if let Ok(info) = root {
        log::debug!("compiled {info}");
        gen.finished.push(info);
    }
    Generated {
        root: ok.then_some(root_id),
        functions: if ok { gen.finished } else { Vec::new() },
        diagnostics: gen.diagnostics,
    }
}

struct CodeGen<'a> {
    options: &'a CompilerOptions,
    hooks: &'a mut dyn CodeGenHooks,
    cur: FunctionState,
    finished: Vec<FunctionInfo>,
    diagnostics: Vec<Diagnostic>,
}

/// Kind of statement-level branch recorded on the innermost loop.
#[derive(Clone, Copy)]
enum Jump {
    Break,
    Continue,
}

impl CodeGen<'_> {
    /* ───── Diagnostics ───── */

    fn error<T>(&mut self, line: u32, msg: impl Into<String>) -> GenResult<T> {
        self.diagnostics.push(Diagnostic::error(line, msg));
        Err(Abort)
    }

    fn internal<T>(&mut self, line: u32, msg: impl Into<String>) -> GenResult<T> {
        self.diagnostics.push(Diagnostic::internal(line, msg));
        Err(Abort)
    }

    fn labels(&mut self, line: u32, res: Result<(), LabelError>) -> GenResult {
        match res {
            Ok(()) => Ok(()),
            Err(e) => self.internal(line, e.to_string()),
        }
    }

    /* ───── Scopes ───── */

    /// Runs `f` with a fresh function state, restoring the enclosing state
    /// whatever `f` returns.
    fn in_function(
        &mut self,
        id: u64,
        name: Option<String>,
        line: u32,
        f: impl FnOnce(&mut Self) -> GenResult,
    ) -> GenResult<FunctionInfo> {
        let fresh = FunctionState::new(id, name, self.options.debug);
        let outer = std::mem::replace(&mut self.cur, fresh);
        let res = f(self);
        let inner = std::mem::replace(&mut self.cur, outer);
        res?;
        self.close(inner, false, line)
    }

    fn close(&mut self, state: FunctionState, root: bool, line: u32) -> GenResult<FunctionInfo> {
        match state.finish(root, self.options.debug) {
            Ok(info) => Ok(info),
            Err(msg) => self.internal(line, msg),
        }
    }

    /// Runs `f` inside a new loop context and hands the context back.
    fn in_loop(&mut self, f: impl FnOnce(&mut Self) -> GenResult) -> GenResult<LoopContext> {
        self.cur.loops.push(LoopContext::default());
        let res = f(self);
        let ctx = self.cur.loops.pop();
        res?;
        match ctx {
            Some(ctx) => Ok(ctx),
            None => self.internal(0, "loop context stack underflow"),
        }
    }

    fn close_loop(&mut self, ctx: &LoopContext, exit: u32, cont: u32, line: u32) -> GenResult {
        let res = self.cur.resolve_all(&ctx.breaks, exit);
        self.labels(line, res)?;
        let res = self.cur.resolve_all(&ctx.continues, cont);
        self.labels(line, res)
    }

    /* ───── Helpers ───── */

    fn emit(&mut self, op: Opcode) { self.cur.code.emit(op); }

    fn here(&self) -> u32 { self.cur.code.tell() }

    fn symbol(&mut self, name: &str) -> u64 { self.hooks.symbol_id(name) }

    fn mark_line(&mut self, node: &Node) {
        if !self.options.debug || node.line == 0 || node.line == self.cur.current_line() {
            return;
        }
        if matches!(node.kind, NodeKind::Statement(Statement::Compound(_)) | NodeKind::Declaration(_)) {
            return;
        }
        self.cur.mark_line(node.line);
    }

    fn resolve_here(&mut self, label: crate::labels::LabelId, line: u32) -> GenResult {
        let res = self.cur.resolve_here(label);
        self.labels(line, res)
    }

    fn is_assignment(node: &Node) -> bool {
        matches!(
            &node.kind,
            NodeKind::Expression(Expression::Operation { op: Operator::Assign, .. })
        )
    }

    /// Identifier naming the member of a dot expression.
    fn dot_member<'n>(&mut self, operands: &'n [Node], line: u32) -> GenResult<(&'n Node, &'n str)> {
        let [obj, member] = operands else {
            return self.internal(line, "dot expects two operands");
        };
        match member.as_identifier() {
            Some(name) => Ok((obj, name)),
            None => self.error(line, "right-hand side of `.` must be an identifier"),
        }
    }

    fn is_member_callee(&self, callee: &Node) -> bool {
        match callee.as_identifier() {
            Some(name) => {
                callee.flags.contains(NodeFlags::IS_MEMBER)
                    || self.cur.vars.class(name) == Some(StorageClass::Member)
            }
            None => false,
        }
    }

    /* ───── Nodes ───── */

    fn gen_node(&mut self, node: &Node) -> GenResult {
        self.mark_line(node);
        match &node.kind {
            NodeKind::Declaration(d) => self.gen_declaration(d, node.line),
            NodeKind::Statement(s) => self.gen_statement(s, node.line),
            NodeKind::Expression(e) => {
                if Self::is_assignment(node) {
                    let NodeKind::Expression(Expression::Operation { operands, .. }) = &node.kind else {
                        return self.internal(node.line, "assignment shape");
                    };
                    return self.gen_assign(operands, node.line);
                }
                self.gen_expression(e, node, None)?;
                if node.flags.contains(NodeFlags::POP_RESULT) {
                    self.emit(Opcode::Pop);
                }
                Ok(())
            }
        }
    }

    fn gen_declaration(&mut self, decl: &Declaration, line: u32) -> GenResult {
        match decl {
            Declaration::Variable { class, name } => {
                match self.cur.vars.declare(name, *class) {
                    Declared::New(class) | Declared::Again(class) => {
                        log::trace!("declared `{name}` as {class:?}");
                    }
                    Declared::Conflict { kept, requested } => {
                        let msg = format!("`{name}` redeclared as {requested:?}, keeping {kept:?}");
                        self.diagnostics.push(Diagnostic::warn(line, msg));
                    }
                }
                Ok(())
            }
            Declaration::Parameter { name } => {
                self.internal(line, format!("parameter `{name}` outside of a function literal"))
            }
        }
    }

    /* ───── Statements ───── */

    fn gen_statement(&mut self, stmt: &Statement, line: u32) -> GenResult {
        match stmt {
            Statement::Compound(items) => items.iter().try_for_each(|n| self.gen_node(n)),
            Statement::If { cond, then, otherwise } => {
                self.gen_expr(cond)?;
                let skip_then = self.cur.reserve(Opcode::BranchZero);
                self.gen_node(then)?;
                match otherwise {
                    Some(other) => {
                        let skip_else = self.cur.reserve(Opcode::Branch);
                        self.resolve_here(skip_then, line)?;
                        self.gen_node(other)?;
                        self.resolve_here(skip_else, line)
                    }
                    None => self.resolve_here(skip_then, line),
                }
            }
            Statement::While { cond, body } => {
                let top = self.here();
                self.gen_expr(cond)?;
                let exit = self.cur.reserve(Opcode::BranchZero);
                let ctx = self.in_loop(|g| g.gen_node(body))?;
                self.cur.code.emit_ptr(Opcode::Branch, u64::from(top));
                self.resolve_here(exit, line)?;
                let end = self.here();
                self.close_loop(&ctx, end, top, line)
            }
            Statement::DoWhile { body, cond } => {
                let top = self.here();
                let ctx = self.in_loop(|g| g.gen_node(body))?;
                let cont = self.here();
                self.gen_expr(cond)?;
                self.cur.code.emit_ptr(Opcode::BranchNonZero, u64::from(top));
                let end = self.here();
                self.close_loop(&ctx, end, cont, line)
            }
            Statement::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.gen_node(init)?;
                }
                let top = self.here();
                let exit = match cond {
                    Some(c) => {
                        self.gen_expr(c)?;
                        Some(self.cur.reserve(Opcode::BranchZero))
                    }
                    None => None,
                };
                let ctx = self.in_loop(|g| g.gen_node(body))?;
                let cont = self.here();
                if let Some(step) = step {
                    self.gen_node(step)?;
                }
                self.cur.code.emit_ptr(Opcode::Branch, u64::from(top));
                if let Some(exit) = exit {
                    self.resolve_here(exit, line)?;
                }
                let end = self.here();
                self.close_loop(&ctx, end, cont, line)
            }
            Statement::Foreach { table, key, value, body } => {
                let key_slot = self.foreach_slot(key.as_deref().unwrap_or(HIDDEN_KEY), line)?;
                let value_slot = self.foreach_slot(value, line)?;
                self.gen_expr(table)?;
                self.cur.push_int(-2);
                let top = self.here();
                self.cur.code.emit32(Opcode::Foreach, pack_foreach(key_slot, value_slot));
                let exit = self.cur.reserve(Opcode::BranchZero);
                let ctx = self.in_loop(|g| g.gen_node(body))?;
                self.cur.code.emit_ptr(Opcode::Branch, u64::from(top));
                self.resolve_here(exit, line)?;
                let end = self.here();
                self.close_loop(&ctx, end, top, line)?;
                self.emit(Opcode::Pop2);
                Ok(())
            }
            Statement::Break => self.gen_jump(Jump::Break, line),
            Statement::Continue => self.gen_jump(Jump::Continue, line),
            Statement::Return(value) => {
                match value {
                    Some(v) => {
                        self.gen_expr(v)?;
                        self.emit(Opcode::ReturnValue);
                    }
                    None => self.emit(Opcode::Return),
                }
                Ok(())
            }
        }
    }

    fn foreach_slot(&mut self, name: &str, line: u32) -> GenResult<u16> {
        let Some(slot) = self.cur.vars.local_slot(name) else {
            return self.error(line, format!("foreach variable `{name}` must be local"));
        };
        match u16::try_from(slot) {
            Ok(s) => Ok(s),
            Err(_) => self.error(line, "too many locals for foreach"),
        }
    }

    fn gen_jump(&mut self, kind: Jump, line: u32) -> GenResult {
        if self.cur.loops.is_empty() {
            let what = match kind {
                Jump::Break => "break",
                Jump::Continue => "continue",
            };
            return self.error(line, format!("`{what}` outside of a loop"));
        }
        let label = self.cur.reserve(Opcode::Branch);
        if let Some(ctx) = self.cur.loops.last_mut() {
            match kind {
                Jump::Break => ctx.breaks.push(label),
                Jump::Continue => ctx.continues.push(label),
            }
        }
        Ok(())
    }

    /* ───── Assignment ───── */

    fn gen_assign(&mut self, operands: &[Node], line: u32) -> GenResult {
        let [lhs, rhs] = operands else {
            return self.internal(line, "assignment expects two operands");
        };
        match &lhs.kind {
            NodeKind::Expression(Expression::Operation { op: Operator::Dot, operands: parts }) => {
                let (obj, member) = self.dot_member(parts, line)?;
                self.gen_expr(obj)?;
                self.gen_value(rhs, Some(member))?;
                let sym = self.symbol(member);
                self.cur.code.emit_ptr(Opcode::SetDot, sym);
                Ok(())
            }
            NodeKind::Expression(Expression::Operation { op: Operator::Index, operands: parts }) => {
                let [obj, key] = parts.as_slice() else {
                    return self.internal(line, "index expects two operands");
                };
                self.gen_expr(obj)?;
                self.gen_expr(key)?;
                self.gen_value(rhs, None)?;
                self.emit(Opcode::SetIndex);
                Ok(())
            }
            NodeKind::Expression(Expression::Identifier(name)) => {
                self.gen_value(rhs, Some(name.as_str()))?;
                let flagged = lhs.flags.contains(NodeFlags::IS_MEMBER);
                match self.cur.vars.resolve(name) {
                    // a Local wins over the member flag
                    Some(Storage::Local(slot)) => self.cur.code.emit32(Opcode::SetLocal, slot),
                    resolved if flagged || resolved == Some(Storage::Member) => {
                        let sym = self.symbol(name);
                        self.cur.code.emit_ptr(Opcode::SetThis, sym);
                    }
                    Some(_) => {
                        let sym = self.symbol(name);
                        self.cur.code.emit_ptr(Opcode::SetGlobal, sym);
                    }
                    None => {
                        let Some(slot) = self.cur.vars.local_slot(name) else {
                            return self.internal(line, format!("cannot declare `{name}`"));
                        };
                        log::trace!("`{name}` implicitly declared local at slot {slot}");
                        self.cur.code.emit32(Opcode::SetLocal, slot);
                    }
                }
                Ok(())
            }
            _ => self.error(line, "invalid assignment target"),
        }
    }

    /* ───── Expressions ───── */

    fn gen_expr(&mut self, node: &Node) -> GenResult {
        match &node.kind {
            NodeKind::Expression(e) => {
                self.mark_line(node);
                self.gen_expression(e, node, None)
            }
            _ => self.internal(node.line, "expected an expression"),
        }
    }

    /// Expression whose value may be named after its destination (function
    /// literals get `name` as debug name).
    fn gen_value(&mut self, node: &Node, name: Option<&str>) -> GenResult {
        match &node.kind {
            NodeKind::Expression(e) => {
                self.mark_line(node);
                self.gen_expression(e, node, name)
            }
            _ => self.internal(node.line, "expected an expression"),
        }
    }

    fn gen_expression(&mut self, expr: &Expression, node: &Node, name: Option<&str>) -> GenResult {
        let line = node.line;
        match expr {
            Expression::Operation { op, operands } => self.gen_operation(*op, operands, line),
            Expression::Constant(c) => {
                match c {
                    Constant::Null => self.emit(Opcode::PushNull),
                    Constant::Int(v) => self.cur.push_int(*v),
                    Constant::Float(v) => self.cur.code.emit_float(Opcode::PushFloat, *v),
                    Constant::Str(s) => {
                        let id = self.hooks.string_id(s);
                        self.cur.code.emit_ptr(Opcode::PushString, id);
                    }
                }
                Ok(())
            }
            Expression::Identifier(ident) => {
                let storage = match self.cur.vars.resolve(ident) {
                    Some(local @ Storage::Local(_)) => local,
                    _ if node.flags.contains(NodeFlags::IS_MEMBER) => Storage::Member,
                    resolved => resolved.unwrap_or(Storage::Global),
                };
                match storage {
                    Storage::Local(slot) => self.cur.code.emit32(Opcode::GetLocal, slot),
                    Storage::Member => {
                        let sym = self.symbol(ident);
                        self.cur.code.emit_ptr(Opcode::GetThis, sym);
                    }
                    Storage::Global => {
                        let sym = self.symbol(ident);
                        self.cur.code.emit_ptr(Opcode::GetGlobal, sym);
                    }
                }
                Ok(())
            }
            Expression::This => {
                self.emit(Opcode::PushThis);
                Ok(())
            }
            Expression::Call { callee, args, receiver } => {
                self.gen_call(callee, args, receiver.as_deref(), line)
            }
            Expression::Function { params, body } => self.gen_function(params, body, name, line),
            Expression::Table(fields) => self.gen_table(fields, line),
        }
    }

    fn gen_operation(&mut self, op: Operator, operands: &[Node], line: u32) -> GenResult {
        if operands.len() != op.arity() {
            return self.internal(
                line,
                format!("operator `{}` with {} operand(s)", op.symbol(), operands.len()),
            );
        }
        let binary = match op {
            Operator::Assign => return self.error(line, "assignment does not produce a value"),
            Operator::AssignField => return self.error(line, "malformed table field"),
            Operator::Dot => {
                let (obj, member) = self.dot_member(operands, line)?;
                self.gen_expr(obj)?;
                let sym = self.symbol(member);
                self.cur.code.emit_ptr(Opcode::GetDot, sym);
                return Ok(());
            }
            Operator::And | Operator::Or => {
                let branch = if op == Operator::And {
                    Opcode::BranchZeroKeep
                } else {
                    Opcode::BranchNonZeroKeep
                };
                self.gen_expr(&operands[0])?;
                let skip = self.cur.reserve(branch);
                self.emit(Opcode::Pop);
                self.gen_expr(&operands[1])?;
                return self.resolve_here(skip, line);
            }
            Operator::Pos | Operator::Neg | Operator::Not | Operator::Complement => {
                self.gen_expr(&operands[0])?;
                self.emit(match op {
                    Operator::Pos => Opcode::Pos,
                    Operator::Neg => Opcode::Neg,
                    Operator::Not => Opcode::Not,
                    _ => Opcode::BitInv,
                });
                return Ok(());
            }
            Operator::Index => Opcode::GetIndex,
            Operator::BitOr => Opcode::BitOr,
            Operator::BitXor => Opcode::BitXor,
            Operator::BitAnd => Opcode::BitAnd,
            Operator::Eq => Opcode::Eq,
            Operator::Neq => Opcode::Neq,
            Operator::Lt => Opcode::Lt,
            Operator::Gt => Opcode::Gt,
            Operator::Lte => Opcode::Lte,
            Operator::Gte => Opcode::Gte,
            Operator::Shl => Opcode::Shl,
            Operator::Shr => Opcode::Shr,
            Operator::Add => Opcode::Add,
            Operator::Sub => Opcode::Sub,
            Operator::Mul => Opcode::Mul,
            Operator::Div => Opcode::Div,
            Operator::Rem => Opcode::Rem,
        };
        self.gen_expr(&operands[0])?;
        self.gen_expr(&operands[1])?;
        self.emit(binary);
        Ok(())
    }

    fn gen_call(&mut self, callee: &Node, args: &[Node], receiver: Option<&Node>, line: u32) -> GenResult {
        let before = self.cur.code.depth();
        let dotted = match (&callee.kind, receiver) {
            (NodeKind::Expression(Expression::Operation { op: Operator::Dot, operands }), None) => {
                Some(operands)
            }
            _ => None,
        };
        if let Some(parts) = dotted {
            let (obj, method) = self.dot_member(parts, line)?;
            self.gen_expr(obj)?;
            self.emit(Opcode::Dup);
            let sym = self.symbol(method);
            self.cur.code.emit_ptr(Opcode::GetDot, sym);
        } else {
            match receiver {
                Some(r) => self.gen_expr(r)?,
                None => match self.options.receiver {
                    ReceiverPolicy::CurrentThis => self.emit(Opcode::PushThis),
                    ReceiverPolicy::MemberOnly if self.is_member_callee(callee) => {
                        self.emit(Opcode::PushThis);
                    }
                    ReceiverPolicy::MemberOnly => self.emit(Opcode::PushNull),
                },
            }
            self.gen_expr(callee)?;
        }
        for a in args {
            self.gen_expr(a)?;
        }
        let Ok(argc) = u32::try_from(args.len()) else {
            return self.error(line, "too many arguments");
        };
        self.cur.code.emit32(Opcode::Call, argc);
        self.cur.code.set_depth(before + 1);
        Ok(())
    }

    fn gen_function(&mut self, params: &[Node], body: &Node, name: Option<&str>, line: u32) -> GenResult {
        let id = self.hooks.function_id();
        let info = self.in_function(id, name.map(str::to_owned), line, |g| {
            for p in params {
                let NodeKind::Declaration(Declaration::Parameter { name }) = &p.kind else {
                    return g.internal(p.line, "function parameter is not a parameter declaration");
                };
                if g.cur.vars.declare_param(name).is_none() {
                    return g.error(p.line.max(line), format!("duplicate parameter `{name}`"));
                }
            }
            g.gen_node(body)?;
            g.emit(Opcode::Return);
            Ok(())
        })?;
        log::debug!("compiled {info}");
        self.finished.push(info);
        self.cur.code.emit_ptr(Opcode::PushFunction, id);
        Ok(())
    }

    fn gen_table(&mut self, fields: &[Node], line: u32) -> GenResult {
        self.emit(Opcode::PushTable);
        let mut index = 0i32;
        for field in fields {
            self.emit(Opcode::Dup);
            match &field.kind {
                NodeKind::Expression(Expression::Operation { op: Operator::AssignField, operands }) => {
                    let [key, value] = operands.as_slice() else {
                        return self.error(field.line.max(line), "malformed table field");
                    };
                    let Some(key) = key.as_identifier() else {
                        return self.error(field.line.max(line), "malformed table field");
                    };
                    self.gen_value(value, Some(key))?;
                    let sym = self.symbol(key);
                    self.cur.code.emit_ptr(Opcode::SetDot, sym);
                }
                _ => {
                    self.cur.push_int(index);
                    index += 1;
                    self.gen_expr(field)?;
                    self.emit(Opcode::SetIndex);
                }
            }
        }
        Ok(())
    }
}
