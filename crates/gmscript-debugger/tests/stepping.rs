//! Sessions de bout en bout sur un programme compilé en mode debug, exécuté
//! par un petit interpréteur de test qui appelle les hooks comme le ferait la VM.

use std::collections::HashMap;

use gmscript_ast::build::*;
use gmscript_ast::{Node, Operator};
use gmscript_compiler::{Compiler, CompilerOptions, Program, ProgramHooks};
use gmscript_core::disasm::decode_at;
use gmscript_core::{Opcode, Operand, SourceEntry, SourceId};
use gmscript_debugger::*;
use pretty_assertions::assert_eq;

const SOURCE: &str = "\
global g; global f;
g = function() {
  x = 10;
  return x;
};
f = function() {
  a = 1;
  a = g();
  a = a + 1;
  return a;
};
r = f();
";

fn unit() -> Node {
    block(vec![
        global("g").at(1),
        global("f").at(1),
        stmt(assign(
            ident("g"),
            function(&[], vec![stmt(assign(ident("x"), int(10))).at(3), ret(Some(ident("x"))).at(4)]),
        ))
        .at(2),
        stmt(assign(
            ident("f"),
            function(
                &[],
                vec![
                    stmt(assign(ident("a"), int(1))).at(7),
                    stmt(assign(ident("a"), call(ident("g"), vec![]))).at(8),
                    stmt(assign(ident("a"), binary(Operator::Add, ident("a"), int(1)))).at(9),
                    ret(Some(ident("a"))).at(10),
                ],
            ),
        ))
        .at(6),
        stmt(assign(ident("r"), call(ident("f"), vec![]))).at(12),
    ])
}

fn program() -> Program {
    let mut hooks = ProgramHooks::new().with_source("game.gm", SOURCE);
    let mut c = Compiler::new(CompilerOptions { debug: true, ..CompilerOptions::default() });
    c.compile(&unit(), &mut hooks).expect("compiles");
    hooks.finish()
}

/* ------------------------- Interpréteur de test -------------------------- */

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Int(i32),
    Func(u64),
}

impl Value {
    fn show(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Int(i) => i.to_string(),
            Self::Func(id) => format!("function fn#{id}"),
        }
    }
}

#[derive(Debug)]
struct Frame {
    function: u64,
    pc: u32,
    base: u32,
    this: Value,
}

#[derive(Debug)]
struct Thread {
    id: ThreadId,
    frames: Vec<Frame>,
    stack: Vec<Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum Run {
    Suspended,
    Finished,
}

struct MiniVm {
    program: Program,
    source: SourceId,
    globals: HashMap<u64, Value>,
    threads: Vec<Thread>,
    hooks_enabled: bool,
}

impl MiniVm {
    fn new(program: Program) -> Self {
        let source = program.source.expect("debug source");
        Self { program, source, globals: HashMap::new(), threads: Vec::new(), hooks_enabled: false }
    }

    fn spawn(&mut self, id: ThreadId) {
        let root = self.program.root_function().expect("root");
        let slots = (root.num_params + root.num_locals) as usize;
        let frame = Frame { function: root.id, pc: 0, base: 0, this: Value::Null };
        self.threads.push(Thread { id, frames: vec![frame], stack: vec![Value::Null; slots] });
    }

    fn thread(&self, id: ThreadId) -> Option<&Thread> { self.threads.iter().find(|t| t.id == id) }

    fn context(&self, t: &Thread, frame: &Frame, offset: u32) -> HookContext {
        let line = self.program.function(frame.function).and_then(|f| f.line_for_address(offset)).unwrap_or(0);
        HookContext {
            thread: t.id,
            frame_base: frame.base,
            address: CodeAddress::new(frame.function, offset),
            source: self.source,
            line,
        }
    }

    /// Exécute `id` jusqu'à suspension ou fin.
    fn run(&mut self, id: ThreadId, hooks: &mut dyn ExecutionHooks) -> Run {
        let idx = self.threads.iter().position(|t| t.id == id).expect("thread");
        loop {
            if self.hooks_enabled && hooks.is_suspended(id) {
                return Run::Suspended;
            }
            // arrêté sur le retour de sa dernière frame
            if self.threads[idx].frames.is_empty() {
                return Run::Finished;
            }
            let mut t = self.threads.swap_remove(idx);
            let outcome = self.exec(&mut t, hooks);
            let done = t.frames.is_empty();
            self.threads.push(t);
            let last = self.threads.len() - 1;
            self.threads.swap(idx, last);
            match outcome {
                Some(r) => return r,
                None if done => return Run::Finished,
                None => {}
            }
        }
    }

    fn exec(&mut self, t: &mut Thread, hooks: &mut dyn ExecutionHooks) -> Option<Run> {
        let frame = t.frames.last_mut().expect("frame");
        let code = &self.program.function(frame.function).expect("function").byte_code;
        let ins = decode_at(code, frame.pc as usize).expect("instruction");
        frame.pc = ins.next_address();
        let base = frame.base as usize;
        let int = match ins.operand {
            Operand::Int(i) => i,
            _ => 0,
        };
        let ptr = match ins.operand {
            Operand::Ptr(p) => p,
            _ => 0,
        };
        match ins.opcode {
            Opcode::Line => {
                let frame = t.frames.last().expect("frame");
                let ctx = self.context(t, frame, frame.pc);
                if self.hooks_enabled && hooks.line(&ctx) {
                    return Some(Run::Suspended);
                }
            }
            Opcode::PushNull => t.stack.push(Value::Null),
            Opcode::PushInt0 => t.stack.push(Value::Int(0)),
            Opcode::PushInt1 => t.stack.push(Value::Int(1)),
            Opcode::PushInt => t.stack.push(Value::Int(int)),
            Opcode::PushFunction => t.stack.push(Value::Func(ptr)),
            Opcode::PushThis => {
                let this = frame.this.clone();
                t.stack.push(this);
            }
            Opcode::GetLocal => {
                let v = t.stack[base + int as usize].clone();
                t.stack.push(v);
            }
            Opcode::SetLocal => {
                let v = t.stack.pop().expect("operand");
                t.stack[base + int as usize] = v;
            }
            Opcode::GetGlobal => t.stack.push(self.globals.get(&ptr).cloned().unwrap_or(Value::Null)),
            Opcode::SetGlobal => {
                let v = t.stack.pop().expect("operand");
                self.globals.insert(ptr, v);
            }
            Opcode::Pop => {
                t.stack.pop();
            }
            Opcode::Add => {
                let (Some(Value::Int(b)), Some(Value::Int(a))) = (t.stack.pop(), t.stack.pop()) else {
                    panic!("add expects ints");
                };
                t.stack.push(Value::Int(a + b));
            }
            Opcode::Call => {
                let argc = int as usize;
                let callee_at = t.stack.len() - argc - 1;
                let Value::Func(id) = t.stack[callee_at] else { panic!("not callable") };
                let callee = self.program.function(id).expect("callee");
                let this = t.stack[callee_at - 1].clone();
                let new_base = t.stack.len() - argc;
                t.stack.resize(new_base + (callee.num_params + callee.num_locals) as usize, Value::Null);
                t.frames.push(Frame { function: id, pc: 0, base: new_base as u32, this });
                let frame = t.frames.last().expect("frame");
                let ctx = self.context(t, frame, 0);
                if self.hooks_enabled && hooks.call(&ctx) {
                    return Some(Run::Suspended);
                }
            }
            Opcode::Return | Opcode::ReturnValue => {
                let result = if ins.opcode == Opcode::ReturnValue { t.stack.pop().expect("result") } else { Value::Null };
                let ended = t.frames.pop().expect("frame");
                t.stack.truncate((ended.base as usize).saturating_sub(2));
                if !t.frames.is_empty() {
                    t.stack.push(result);
                }
                // reprise dans l'appelant, base de la frame terminée
                let mut ctx = match t.frames.last() {
                    Some(caller) => self.context(t, caller, caller.pc),
                    None => self.context(t, &ended, ins.address),
                };
                ctx.frame_base = ended.base;
                if self.hooks_enabled && hooks.ret(&ctx) {
                    return Some(Run::Suspended);
                }
            }
            other => panic!("unsupported opcode {other:?}"),
        }
        None
    }
}

impl DebugTarget for MiniVm {
    fn set_hooks_enabled(&mut self, enabled: bool) { self.hooks_enabled = enabled; }

    fn threads(&self) -> Vec<ThreadSnapshot> {
        self.threads.iter().map(|t| ThreadSnapshot { id: t.id, state: ThreadState::Running }).collect()
    }

    fn frame_base(&self, thread: ThreadId) -> Option<FrameBase> {
        self.thread(thread)?.frames.last().map(|f| f.base)
    }

    fn frames(&self, thread: ThreadId) -> Vec<FrameSnapshot> {
        let Some(t) = self.thread(thread) else { return Vec::new() };
        t.frames
            .iter()
            .rev()
            .filter_map(|fr| {
                let info = self.program.function(fr.function)?;
                let slots = info.num_params + info.num_locals;
                let locals = (0..slots)
                    .map(|s| {
                        let name = info.symbol(s).unwrap_or("?");
                        VariableSnapshot::new(name, t.stack[(fr.base + s) as usize].show(), 0)
                    })
                    .collect();
                Some(FrameSnapshot {
                    function: info.display_name(),
                    source: self.source,
                    line: info.line_for_address(fr.pc.saturating_sub(1)).unwrap_or(0),
                    base: fr.base,
                    this: VariableSnapshot::new("this", fr.this.show(), 0),
                    locals,
                })
            })
            .collect()
    }

    fn variable(&self, _reference: VarRef) -> Option<Vec<VariableSnapshot>> { None }

    fn sources(&self) -> Vec<SourceEntry> { self.program.sources.iter().cloned().collect() }

    fn line_marker_address(&self, source: SourceId, line: u32) -> Option<CodeAddress> {
        if source != self.source {
            return None;
        }
        self.program
            .functions
            .iter()
            .find_map(|f| f.line_marker_address(line).map(|a| CodeAddress::new(f.id, a)))
    }
}

/* -------------------------------- Scénarios -------------------------------- */

struct Fixture {
    vm: MiniVm,
    session: DebugSession<ChannelTransport>,
    debugger: DebuggerLink,
}

impl Fixture {
    fn new() -> Self {
        let mut vm = MiniVm::new(program());
        let (vm_side, debugger) = channel_pair();
        let session = DebugSession::open(vm_side, SessionOptions::default(), &mut vm);
        Self { vm, session, debugger }
    }

    fn command(&mut self, cmd: Command) {
        self.debugger.send(&cmd).unwrap();
        self.session.update(&mut self.vm).unwrap();
    }

    fn run(&mut self, thread: ThreadId) -> Run { self.vm.run(thread, &mut self.session) }

    fn breaks(&self) -> Vec<Event> {
        self.debugger.drain().into_iter().filter(|e| matches!(e, Event::Break { .. })).collect()
    }

    fn set_breakpoint(&mut self, line: u32, enabled: bool) {
        let source = self.vm.source;
        self.command(Command::SetBreakpoint { response: line, source, line, thread: 0, enabled });
        assert_eq!(self.debugger.drain(), vec![Event::Ack { response: line, ok: true }]);
    }
}

#[test]
fn breakpoint_reports_thread_source_and_line() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(8, true);

    let f = fx.vm.program.functions.iter().find(|f| f.debug_name.as_deref() == Some("f")).unwrap();
    let marker = f.line_marker_address(8).unwrap();
    assert_eq!(
        fx.session.breakpoints().iter().collect::<Vec<_>>(),
        vec![(CodeAddress::new(f.id, marker + 4), None)]
    );

    fx.vm.spawn(1);
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 8 }]);

    // suspendu : l'interpréteur ne progresse plus
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![]);
}

#[test]
fn context_lists_frames_and_selected_locals() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(8, true);
    fx.vm.spawn(1);
    fx.run(1);
    fx.debugger.drain();

    fx.command(Command::GetContext { thread: 1, frame: 0 });
    assert_eq!(
        fx.debugger.drain(),
        vec![
            Event::BeginContext { thread: 1, frame: 0 },
            Event::ContextCall {
                frame: 0,
                function: "f".into(),
                source,
                line: 8,
                this_name: "this".into(),
                this_value: "null".into(),
                this_reference: 0,
            },
            Event::ContextVariable { name: "a".into(), value: "1".into(), reference: 0 },
            Event::ContextCall {
                frame: 1,
                function: "__main".into(),
                source,
                line: 12,
                this_name: "this".into(),
                this_value: "null".into(),
                this_reference: 0,
            },
            Event::EndContext,
        ]
    );
}

#[test]
fn step_over_skips_the_callee() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(8, true);
    fx.vm.spawn(1);
    fx.run(1);
    fx.breaks();
    let marker = fx.vm.frame_base(1).unwrap();

    fx.command(Command::StepOver { thread: 1 });
    assert_eq!(fx.session.thread_state(1).marker, Some(marker));
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 9 }]);
    assert_eq!(fx.vm.frame_base(1), Some(marker));
}

#[test]
fn step_into_stops_at_callee_first_line() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(8, true);
    fx.vm.spawn(2);
    fx.run(2);
    fx.breaks();
    let caller = fx.vm.frame_base(2).unwrap();

    fx.command(Command::StepInto { thread: 2 });
    assert_eq!(fx.run(2), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 2, source, line: 3 }]);
    assert_ne!(fx.vm.frame_base(2), Some(caller));

    // step-out : retour dans f, sur la ligne d'appel
    fx.command(Command::StepOut { thread: 2 });
    assert_eq!(fx.run(2), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 2, source, line: 8 }]);
    assert_eq!(fx.vm.frame_base(2), Some(caller));
}

#[test]
fn consecutive_step_into_advances_in_callee() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(8, true);
    fx.vm.spawn(1);
    fx.run(1);
    fx.breaks();

    fx.command(Command::StepInto { thread: 1 });
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 3 }]);
    let callee = fx.vm.frame_base(1);

    fx.command(Command::StepInto { thread: 1 });
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 4 }]);
    assert_eq!(fx.vm.frame_base(1), callee);
}

#[test]
fn step_over_a_return_lands_in_caller() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(10, true);
    fx.vm.spawn(1);
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 10 }]);

    fx.command(Command::StepOver { thread: 1 });
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 12 }]);
    assert_eq!(fx.vm.frame_base(1), Some(0));
}

#[test]
fn step_out_of_root_stops_at_thread_end() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.set_breakpoint(12, true);
    fx.vm.spawn(1);
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 12 }]);

    // rien dans f ni g ne l'arrête : seul le retour de la racine compte
    fx.command(Command::StepOut { thread: 1 });
    assert_eq!(fx.run(1), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 1, source, line: 12 }]);
    assert_eq!(fx.vm.frame_base(1), None);

    fx.command(Command::GetContext { thread: 1, frame: 0 });
    assert_eq!(fx.debugger.drain(), vec![Event::Error("no frame 0 on thread 1".into())]);

    fx.command(Command::Run { thread: 1 });
    assert_eq!(fx.run(1), Run::Finished);
    assert_eq!(fx.vm.globals.len(), 2);
}

#[test]
fn removed_breakpoint_no_longer_fires() {
    let mut fx = Fixture::new();
    fx.set_breakpoint(8, true);
    fx.vm.spawn(1);
    fx.run(1);
    assert_eq!(fx.breaks().len(), 1);

    fx.set_breakpoint(8, false);
    assert!(fx.session.breakpoints().is_empty());
    fx.command(Command::Run { thread: 1 });
    assert_eq!(fx.run(1), Run::Finished);

    fx.vm.spawn(3);
    assert_eq!(fx.run(3), Run::Finished);
    assert_eq!(fx.breaks(), vec![]);
    assert_eq!(fx.vm.globals.len(), 2);
}

#[test]
fn thread_scoped_breakpoint_ignores_other_threads() {
    let mut fx = Fixture::new();
    let source = fx.vm.source;
    fx.command(Command::SetBreakpoint { response: 1, source, line: 9, thread: 5, enabled: true });
    fx.command(Command::SetBreakpoint { response: 2, source, line: 9, thread: 6, enabled: true });
    assert_eq!(
        fx.debugger.drain(),
        vec![Event::Ack { response: 1, ok: true }, Event::Ack { response: 2, ok: false }]
    );

    fx.vm.spawn(4);
    assert_eq!(fx.run(4), Run::Finished);
    fx.vm.spawn(5);
    assert_eq!(fx.run(5), Run::Suspended);
    assert_eq!(fx.breaks(), vec![Event::Break { thread: 5, source, line: 9 }]);
}

#[test]
fn end_releases_suspended_threads() {
    let mut fx = Fixture::new();
    fx.set_breakpoint(8, true);
    fx.vm.spawn(1);
    fx.run(1);
    fx.breaks();

    fx.command(Command::End);
    assert!(!fx.vm.hooks_enabled);
    assert_eq!(fx.debugger.drain(), vec![Event::SessionEnd]);
    assert_eq!(fx.run(1), Run::Finished);
}
