//! hook.rs - Points d'extension entre l'interpréteur gmscript et le débogueur
//!
//! L'interpréteur appelle ces hooks de façon synchrone :
//!   * `line`   avant d'exécuter l'instruction qui suit un marqueur `line`
//!   * `call`   à l'entrée d'une fonction
//!   * `ret`    à la sortie d'une fonction
//! et consulte `is_suspended` avant de reprendre un thread.
//!
//! Un hook qui renvoie `true` demande la suspension du thread ; l'interpréteur
//! rend la main et réessaiera au prochain tick.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use gmscript_core::SourceId;

use crate::api::{FrameBase, ThreadId};
use crate::breakpoint::CodeAddress;

/// Contexte au site d'exécution courant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HookContext {
    pub thread: ThreadId,
    /// Base de la frame qui exécute (pour `ret` : la frame qui se termine).
    pub frame_base: FrameBase,
    /// Instruction sur le point d'être exécutée (pour `ret` : point de
    /// reprise dans l'appelant).
    pub address: CodeAddress,
    pub source: SourceId,
    pub line: u32,
}

/// Hooks exposés à l'interpréteur.
pub trait ExecutionHooks {
    /// Nouvelle ligne source. `true` = suspendre.
    fn line(&mut self, ctx: &HookContext) -> bool;

    /// Entrée dans une fonction. `true` = suspendre.
    fn call(&mut self, ctx: &HookContext) -> bool;

    /// Sortie d'une fonction. `true` = suspendre.
    fn ret(&mut self, ctx: &HookContext) -> bool;

    /// Le thread attend-il le débogueur ?
    fn is_suspended(&self, thread: ThreadId) -> bool;
}

/// Hooks inertes (pas de session ouverte).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ExecutionHooks for NoHooks {
    fn line(&mut self, _ctx: &HookContext) -> bool { false }
    fn call(&mut self, _ctx: &HookContext) -> bool { false }
    fn ret(&mut self, _ctx: &HookContext) -> bool { false }
    fn is_suspended(&self, _thread: ThreadId) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_hooks_never_suspend() {
        let mut h = NoHooks;
        let ctx = HookContext { thread: 1, line: 3, ..HookContext::default() };
        assert!(!h.line(&ctx));
        assert!(!h.call(&ctx));
        assert!(!h.ret(&ctx));
        assert!(!h.is_suspended(1));
    }
}
