//! gmscript Debugger - session de débogage à distance
//!
//! - Protocole : messages préfixés d'un tag de 4 octets ASCII (`mrun`, `dbrk`, ...)
//! - Transport : paire de canaux crossbeam (`channel_pair`), drainée par `update`
//! - Points d'arrêt par adresse d'instruction, filtrables par thread
//! - Pas-à-pas into / over / out par thread, au niveau des frames
//! - Hooks `line` / `call` / `ret` appelés par l'interpréteur
//!
//! L'interpréteur expose ses threads, frames et sources via [`DebugTarget`] ;
//! la session ([`DebugSession`]) implémente [`ExecutionHooks`].
//!
//! ```
//! use gmscript_debugger::{channel_pair, Command, DebugSession, Event, SessionOptions};
//! # use gmscript_debugger::{CodeAddress, DebugTarget, FrameSnapshot, ThreadSnapshot, VariableSnapshot};
//! # use gmscript_core::SourceEntry;
//! # struct Vm;
//! # impl DebugTarget for Vm {
//! #     fn set_hooks_enabled(&mut self, _: bool) {}
//! #     fn threads(&self) -> Vec<ThreadSnapshot> { Vec::new() }
//! #     fn frame_base(&self, _: u32) -> Option<u32> { None }
//! #     fn frames(&self, _: u32) -> Vec<FrameSnapshot> { Vec::new() }
//! #     fn variable(&self, _: u32) -> Option<Vec<VariableSnapshot>> { None }
//! #     fn sources(&self) -> Vec<SourceEntry> { Vec::new() }
//! #     fn line_marker_address(&self, _: u32, _: u32) -> Option<CodeAddress> { None }
//! # }
//! let (vm_side, debugger) = channel_pair();
//! let mut vm = Vm;
//! let mut session = DebugSession::open(vm_side, SessionOptions::default(), &mut vm);
//!
//! debugger.send(&Command::End).unwrap();
//! session.update(&mut vm).unwrap();
//! assert_eq!(debugger.drain(), vec![Event::SessionEnd]);
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod breakpoint;
pub mod hook;
pub mod protocol;
pub mod session;
pub mod step;
pub mod transport;

pub use api::{
    DebugTarget, FrameBase, FrameSnapshot, ThreadId, ThreadSnapshot, ThreadState, VarRef,
    VariableSnapshot,
};
pub use breakpoint::{BreakpointError, BreakpointTable, CodeAddress};
pub use hook::{ExecutionHooks, HookContext, NoHooks};
pub use protocol::{tags, Command, Event, MessageTag, ProtocolError, ProtocolResult};
pub use session::{DebugSession, SessionOptions};
pub use step::{StepController, StepMode, ThreadDebugState};
pub use transport::{channel_pair, ChannelTransport, DebuggerLink, Transport};
