//! session.rs - Session de débogage côté interpréteur
//!
//! Cycle de vie :
//!   1. `DebugSession::open` active les hooks de la cible
//!   2. l'hôte appelle `update` à chaque tick : les commandes en attente sont
//!      décodées puis traitées (au plus `max_commands_per_update`)
//!   3. l'interpréteur appelle les hooks `line` / `call` / `ret` ; un arrêt
//!      émet `dbrk` et suspend le thread
//!   4. `end` (ou la commande `mend`) coupe les hooks, oublie les états et
//!      les points d'arrêt, puis émet `dend`
//!
//! Les commandes malformées ou inconnues sont journalisées puis ignorées ;
//! seule une déconnexion du transport remonte à l'appelant.

use gmscript_core::bytecode::TAG_SIZE;
use gmscript_core::{StreamBuffer, SourceId};

use crate::api::{DebugTarget, ThreadId, ThreadState};
use crate::breakpoint::{BreakpointTable, CodeAddress};
use crate::hook::{ExecutionHooks, HookContext};
use crate::protocol::{Command, Event, ProtocolResult};
use crate::step::{StepController, StepMode, ThreadDebugState};
use crate::transport::Transport;

/// Réglages de session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Journalise (niveau trace) chaque message reçu ou émis.
    pub trace: bool,
    /// Borne du nombre de commandes traitées par `update`.
    pub max_commands_per_update: usize,
}

impl Default for SessionOptions {
    fn default() -> Self { Self { trace: false, max_commands_per_update: 64 } }
}

/// Session attachée à un transport.
#[derive(Debug)]
pub struct DebugSession<T: Transport> {
    transport: T,
    options: SessionOptions,
    breakpoints: BreakpointTable,
    threads: StepController,
    /// Lignes de journal rejouées au débogueur avec la prochaine exception.
    pending_log: Vec<String>,
    /// Tampon de sortie réutilisé d'un message à l'autre.
    out: StreamBuffer,
    open: bool,
}

impl<T: Transport> DebugSession<T> {
    /// Ouvre la session et branche les hooks de `target`.
    pub fn open(transport: T, options: SessionOptions, target: &mut dyn DebugTarget) -> Self {
        target.set_hooks_enabled(true);
        log::debug!("debug session opened");
        Self {
            transport,
            options,
            breakpoints: BreakpointTable::new(),
            threads: StepController::new(),
            pending_log: Vec::new(),
            out: StreamBuffer::with_capacity(256),
            open: true,
        }
    }

    pub fn is_open(&self) -> bool { self.open }

    pub fn options(&self) -> &SessionOptions { &self.options }

    pub fn breakpoints(&self) -> &BreakpointTable { &self.breakpoints }

    /// État de débogage de `thread`.
    pub fn thread_state(&self, thread: ThreadId) -> ThreadDebugState { self.threads.state(thread) }

    pub fn transport(&self) -> &T { &self.transport }

    /* ----------------------------- Boucle ----------------------------- */

    /// Traite les commandes en attente. Rend le nombre de messages consommés.
    pub fn update(&mut self, target: &mut dyn DebugTarget) -> ProtocolResult<usize> {
        let mut handled = 0;
        while self.open && handled < self.options.max_commands_per_update {
            let Some(bytes) = self.transport.try_recv()? else { break };
            handled += 1;
            match Command::decode(&bytes) {
                Ok(cmd) => {
                    if self.options.trace {
                        log::trace!("session ← {cmd:?}");
                    }
                    self.dispatch(cmd, target)?;
                }
                Err(e) => log::warn!("ignoring debugger message: {e}"),
            }
        }
        Ok(handled)
    }

    fn dispatch(&mut self, cmd: Command, target: &mut dyn DebugTarget) -> ProtocolResult<()> {
        match cmd {
            Command::Run { thread } => {
                self.threads.resume(thread);
                log::debug!("thread {thread} resumed");
                Ok(())
            }
            Command::StepInto { thread } | Command::ForceBreak { thread } => {
                self.begin_step(thread, StepMode::Into, target)
            }
            Command::StepOver { thread } => self.begin_step(thread, StepMode::Over, target),
            Command::StepOut { thread } => self.begin_step(thread, StepMode::Out, target),
            Command::GetContext { thread, frame } => self.send_context(thread, frame, target),
            Command::GetSource { source } => match target.source(source) {
                Some(s) => self.send(Event::Source { id: s.id, name: s.name, text: s.text }),
                None => self.send_error(format!("unknown source {source:#010x}")),
            },
            Command::GetSourceInfo => {
                self.send(Event::BeginSourceInfo)?;
                for s in target.sources() {
                    self.send(Event::SourceInfo { id: s.id, name: s.name })?;
                }
                self.send(Event::EndSourceInfo)
            }
            Command::GetThreadInfo => {
                self.send(Event::BeginThreadInfo)?;
                for t in target.threads() {
                    let state = if self.threads.is_suspended(t.id) { ThreadState::Debug } else { t.state };
                    self.send(Event::ThreadInfo { thread: t.id, state })?;
                }
                self.send(Event::EndThreadInfo)
            }
            Command::GetVariableInfo { reference } => match target.variable(reference) {
                Some(members) => {
                    self.send(Event::BeginVariableInfo { reference })?;
                    for v in members {
                        self.send(Event::ContextVariable { name: v.name, value: v.value, reference: v.reference })?;
                    }
                    self.send(Event::EndVariableInfo)
                }
                None => self.send_error(format!("unknown variable reference {reference}")),
            },
            Command::SetBreakpoint { response, source, line, thread, enabled } => {
                let ok = self.set_breakpoint(source, line, thread, enabled, target);
                self.send(Event::Ack { response, ok })
            }
            Command::End => self.end(target),
        }
    }

    fn begin_step(&mut self, thread: ThreadId, mode: StepMode, target: &dyn DebugTarget) -> ProtocolResult<()> {
        match target.frame_base(thread) {
            Some(base) => {
                self.threads.begin(thread, mode, base);
                log::debug!("thread {thread}: {mode:?} from frame {base}");
                Ok(())
            }
            None => self.send_error(format!("unknown thread {thread}")),
        }
    }

    fn send_context(&mut self, thread: ThreadId, frame: u32, target: &dyn DebugTarget) -> ProtocolResult<()> {
        let frames = target.frames(thread);
        if frame as usize >= frames.len() {
            return self.send_error(format!("no frame {frame} on thread {thread}"));
        }
        self.send(Event::BeginContext { thread, frame })?;
        for (index, f) in (0u32..).zip(frames) {
            self.send(Event::ContextCall {
                frame: index,
                function: f.function,
                source: f.source,
                line: f.line,
                this_name: f.this.name,
                this_value: f.this.value,
                this_reference: f.this.reference,
            })?;
            if index == frame {
                for v in f.locals {
                    self.send(Event::ContextVariable { name: v.name, value: v.value, reference: v.reference })?;
                }
            }
        }
        self.send(Event::EndContext)
    }

    /// Arme ou désarme le point d'arrêt de `(source, line)`. `thread == 0` = tous.
    fn set_breakpoint(
        &mut self,
        source: SourceId,
        line: u32,
        thread: ThreadId,
        enabled: bool,
        target: &dyn DebugTarget,
    ) -> bool {
        let Some(marker) = target.line_marker_address(source, line) else {
            log::warn!("no code at {source:#010x}:{line}");
            return false;
        };
        // l'arrêt se fait sur l'instruction qui suit le marqueur
        let address = marker.offset_by(TAG_SIZE as u32);
        let scope = (thread != 0).then_some(thread);
        let result = if enabled {
            self.breakpoints.insert(address, scope)
        } else {
            self.breakpoints.remove(address).map(drop)
        };
        match result {
            Ok(()) => {
                log::debug!("breakpoint {} at {address}", if enabled { "set" } else { "cleared" });
                true
            }
            Err(e) => {
                log::warn!("{e}");
                false
            }
        }
    }

    /* --------------------------- Notifications --------------------------- */

    /// Met une ligne de journal de côté pour la prochaine exception.
    pub fn queue_log(&mut self, line: impl Into<String>) { self.pending_log.push(line.into()); }

    /// Exception levée dans `thread` : `dexc` puis le journal en attente.
    pub fn on_exception(&mut self, thread: ThreadId) -> ProtocolResult<()> {
        self.send(Event::Exception { thread })?;
        for line in std::mem::take(&mut self.pending_log) {
            self.send(Event::Message(line))?;
        }
        Ok(())
    }

    pub fn thread_started(&mut self, thread: ThreadId) -> ProtocolResult<()> {
        self.send(Event::ThreadStarted { thread })
    }

    /// Le thread a terminé : son état de débogage est oublié.
    pub fn thread_stopped(&mut self, thread: ThreadId) -> ProtocolResult<()> {
        self.threads.resume(thread);
        self.send(Event::ThreadStopped { thread })
    }

    pub fn send_message(&mut self, text: impl Into<String>) -> ProtocolResult<()> {
        self.send(Event::Message(text.into()))
    }

    pub fn send_error(&mut self, text: impl Into<String>) -> ProtocolResult<()> {
        self.send(Event::Error(text.into()))
    }

    /// Termine la session. Sans effet si elle est déjà close.
    pub fn end(&mut self, target: &mut dyn DebugTarget) -> ProtocolResult<()> {
        if !self.open {
            return Ok(());
        }
        target.set_hooks_enabled(false);
        self.threads.clear();
        self.breakpoints.clear();
        self.pending_log.clear();
        self.open = false;
        log::debug!("debug session closed");
        self.send(Event::SessionEnd)
    }

    fn send(&mut self, event: Event) -> ProtocolResult<()> {
        if self.options.trace {
            log::trace!("session → {event:?}");
        }
        self.out.clear();
        // un StreamBuffer grandit : l'écriture ne peut pas échouer
        let _ = event.encode(&mut self.out);
        self.transport.send(self.out.as_slice().to_vec())
    }

    /// Prévient le débogueur puis suspend le thread. Sans notification
    /// livrée, le thread n'est pas suspendu.
    fn stop(&mut self, ctx: &HookContext) -> bool {
        if let Err(e) = self.send(Event::Break { thread: ctx.thread, source: ctx.source, line: ctx.line }) {
            log::warn!("thread {} not stopped at {}: {e}", ctx.thread, ctx.address);
            return false;
        }
        self.threads.suspend(ctx.thread);
        log::debug!("thread {} stopped at {}:{}", ctx.thread, ctx.address, ctx.line);
        true
    }

    /// Le point d'arrêt touché par `ctx`, s'il y en a un.
    pub fn breakpoint_at(&self, ctx: &HookContext) -> Option<CodeAddress> {
        self.breakpoints.hit(ctx.address, ctx.thread).then_some(ctx.address)
    }
}

impl<T: Transport> ExecutionHooks for DebugSession<T> {
    fn line(&mut self, ctx: &HookContext) -> bool {
        if !self.open {
            return false;
        }
        if self.threads.is_suspended(ctx.thread) {
            return true;
        }
        if self.breakpoint_at(ctx).is_some() || self.threads.should_stop_on_line(ctx.thread, ctx.frame_base) {
            return self.stop(ctx);
        }
        false
    }

    /// Step-into : le pas passe dans la frame appelée, l'arrêt se fait sur
    /// sa première ligne (ou à son retour si elle n'en a pas).
    fn call(&mut self, ctx: &HookContext) -> bool {
        if self.open && self.threads.should_stop_on_call(ctx.thread) {
            self.threads.begin(ctx.thread, StepMode::Into, ctx.frame_base);
            log::debug!("thread {}: stepping into frame {}", ctx.thread, ctx.frame_base);
        }
        false
    }

    fn ret(&mut self, ctx: &HookContext) -> bool {
        if self.open && self.threads.should_stop_on_return(ctx.thread, ctx.frame_base) {
            return self.stop(ctx);
        }
        false
    }

    fn is_suspended(&self, thread: ThreadId) -> bool { self.open && self.threads.is_suspended(thread) }
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FrameBase, FrameSnapshot, ThreadSnapshot, VarRef, VariableSnapshot};
    use crate::transport::{channel_pair, ChannelTransport, DebuggerLink};
    use gmscript_core::SourceEntry;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Stub {
        hooks: bool,
        frames: Vec<FrameSnapshot>,
    }

    impl DebugTarget for Stub {
        fn set_hooks_enabled(&mut self, enabled: bool) { self.hooks = enabled; }
        fn threads(&self) -> Vec<ThreadSnapshot> {
            vec![
                ThreadSnapshot { id: 1, state: ThreadState::Running },
                ThreadSnapshot { id: 2, state: ThreadState::Sleeping },
            ]
        }
        fn frame_base(&self, thread: ThreadId) -> Option<FrameBase> { (thread == 1).then_some(0) }
        fn frames(&self, thread: ThreadId) -> Vec<FrameSnapshot> {
            if thread == 1 { self.frames.clone() } else { Vec::new() }
        }
        fn variable(&self, reference: VarRef) -> Option<Vec<VariableSnapshot>> {
            (reference == 9).then(|| vec![VariableSnapshot::new("x", "1", 0)])
        }
        fn sources(&self) -> Vec<SourceEntry> {
            vec![SourceEntry { id: 42, name: "a.gm".into(), text: "x = 1;".into() }]
        }
        fn line_marker_address(&self, source: SourceId, line: u32) -> Option<CodeAddress> {
            (source == 42 && line == 3).then_some(CodeAddress::new(0, 16))
        }
    }

    fn opened() -> (DebugSession<ChannelTransport>, DebuggerLink, Stub) {
        let (vm, dbg) = channel_pair();
        let mut target = Stub::default();
        let session = DebugSession::open(vm, SessionOptions::default(), &mut target);
        (session, dbg, target)
    }

    #[test]
    fn open_and_end_toggle_hooks() {
        let (mut s, dbg, mut target) = opened();
        assert!(target.hooks);
        dbg.send(&Command::End).unwrap();
        assert_eq!(s.update(&mut target), Ok(1));
        assert!(!target.hooks);
        assert!(!s.is_open());
        assert_eq!(dbg.drain(), vec![Event::SessionEnd]);
        // une seconde fin est silencieuse
        s.end(&mut target).unwrap();
        assert_eq!(dbg.drain(), vec![]);
    }

    #[test]
    fn breakpoint_lands_after_line_marker() {
        let (mut s, dbg, mut target) = opened();
        dbg.send(&Command::SetBreakpoint { response: 5, source: 42, line: 3, thread: 0, enabled: true }).unwrap();
        dbg.send(&Command::SetBreakpoint { response: 6, source: 42, line: 4, thread: 0, enabled: true }).unwrap();
        s.update(&mut target).unwrap();
        assert_eq!(dbg.drain(), vec![Event::Ack { response: 5, ok: true }, Event::Ack { response: 6, ok: false }]);
        assert_eq!(s.breakpoints().iter().collect::<Vec<_>>(), vec![(CodeAddress::new(0, 20), None)]);
    }

    #[test]
    fn thread_info_reports_suspended_threads_as_debug() {
        let (mut s, dbg, mut target) = opened();
        s.threads.suspend(2);
        dbg.send(&Command::GetThreadInfo).unwrap();
        s.update(&mut target).unwrap();
        assert_eq!(
            dbg.drain(),
            vec![
                Event::BeginThreadInfo,
                Event::ThreadInfo { thread: 1, state: ThreadState::Running },
                Event::ThreadInfo { thread: 2, state: ThreadState::Debug },
                Event::EndThreadInfo,
            ]
        );
    }

    #[test]
    fn unknown_thread_and_bad_frame_answer_with_errors() {
        let (mut s, dbg, mut target) = opened();
        dbg.send(&Command::StepOver { thread: 7 }).unwrap();
        dbg.send(&Command::GetContext { thread: 1, frame: 0 }).unwrap();
        dbg.send(&Command::GetVariableInfo { reference: 3 }).unwrap();
        s.update(&mut target).unwrap();
        assert_eq!(
            dbg.drain(),
            vec![
                Event::Error("unknown thread 7".into()),
                Event::Error("no frame 0 on thread 1".into()),
                Event::Error("unknown variable reference 3".into()),
            ]
        );
    }

    #[test]
    fn garbage_is_ignored_and_update_is_bounded() {
        let (vm, dbg) = channel_pair();
        let mut target = Stub::default();
        let options = SessionOptions { trace: true, max_commands_per_update: 2 };
        let mut s = DebugSession::open(vm, options, &mut target);
        dbg.send_raw(b"zzzz".to_vec()).unwrap();
        dbg.send(&Command::GetSourceInfo).unwrap();
        dbg.send(&Command::GetSourceInfo).unwrap();
        assert_eq!(s.update(&mut target), Ok(2));
        assert_eq!(dbg.drain().len(), 3);
        assert_eq!(s.update(&mut target), Ok(1));
        assert_eq!(s.update(&mut target), Ok(0));
    }

    #[test]
    fn exception_flushes_queued_log() {
        let (mut s, dbg, _target) = opened();
        s.queue_log("first");
        s.queue_log("second");
        s.on_exception(1).unwrap();
        s.on_exception(1).unwrap();
        assert_eq!(
            dbg.drain(),
            vec![
                Event::Exception { thread: 1 },
                Event::Message("first".into()),
                Event::Message("second".into()),
                Event::Exception { thread: 1 },
            ]
        );
    }

    #[test]
    fn lost_break_notification_leaves_thread_running() {
        let (mut s, dbg, _target) = opened();
        s.threads.begin(1, StepMode::Over, 0);
        drop(dbg);
        let ctx = HookContext { thread: 1, frame_base: 0, line: 3, ..HookContext::default() };
        assert!(!s.line(&ctx));
        assert!(!s.is_suspended(1));
    }

    #[test]
    fn step_into_moves_to_callee_frame() {
        let (mut s, dbg, _target) = opened();
        s.threads.begin(1, StepMode::Into, 0);
        let entry = HookContext { thread: 1, frame_base: 4, line: 7, ..HookContext::default() };
        assert!(!s.call(&entry));
        assert_eq!(s.thread_state(1).marker, Some(4));
        assert_eq!(dbg.drain(), vec![]);

        // première ligne de l'appelé : un seul arrêt
        let first = HookContext { address: CodeAddress::new(2, 4), ..entry };
        assert!(s.line(&first));
        assert_eq!(dbg.drain(), vec![Event::Break { thread: 1, source: 0, line: 7 }]);
    }

    #[test]
    fn suspended_thread_keeps_reporting_suspension() {
        let (mut s, dbg, mut target) = opened();
        dbg.send(&Command::ForceBreak { thread: 1 }).unwrap();
        s.update(&mut target).unwrap();
        let ctx = HookContext { thread: 1, frame_base: 0, source: 42, line: 3, ..HookContext::default() };
        assert!(s.line(&ctx));
        assert!(s.is_suspended(1));
        assert!(s.line(&ctx));
        assert_eq!(dbg.drain(), vec![Event::Break { thread: 1, source: 42, line: 3 }]);

        dbg.send(&Command::Run { thread: 1 }).unwrap();
        s.update(&mut target).unwrap();
        assert!(!s.is_suspended(1));
        assert!(!s.line(&ctx));
    }
}
