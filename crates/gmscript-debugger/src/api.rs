//! api.rs - Contrat entre l'interpréteur et la session de débogage
//!
//! - `DebugTarget` : ce que l'interpréteur expose à la session (threads,
//!   frames, variables, sources, résolution ligne → adresse)
//! - instantanés (`FrameSnapshot`, `VariableSnapshot`, `ThreadSnapshot`)
//!   rendus par la cible au moment de la requête
//!
//! La session ne garde aucune copie : chaque requête `get-context`,
//! `get-thread-info`, ... interroge la cible.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use gmscript_core::{SourceEntry, SourceId};

use crate::breakpoint::CodeAddress;

/// Identifiant de thread de l'interpréteur. `0` signifie « aucun » sur le fil.
pub type ThreadId = u32;

/// Base de frame : position de pile où commencent les locaux d'une activation.
pub type FrameBase = u32;

/// Référence d'objet inspectable (`0` = valeur non référencée).
pub type VarRef = u32;

/// État d'un thread tel que rapporté par `get-thread-info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u32)]
pub enum ThreadState {
    /// En cours d'exécution.
    Running = 0,
    /// Bloqué sur un signal.
    Blocked = 1,
    /// Endormi.
    Sleeping = 2,
    /// Arrêté sur une exception.
    Exception = 3,
    /// Suspendu par le débogueur.
    Debug = 4,
}

impl ThreadState {
    /// Valeur transmise sur le fil.
    pub const fn code(self) -> u32 { self as u32 }

    /// Décode une valeur du fil.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Running,
            1 => Self::Blocked,
            2 => Self::Sleeping,
            3 => Self::Exception,
            4 => Self::Debug,
            _ => return None,
        })
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Sleeping => "sleeping",
            Self::Exception => "exception",
            Self::Debug => "debug",
        })
    }
}

/// Variable rendue : nom, valeur affichable, référence (0 si non expansible).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VariableSnapshot {
    pub name: String,
    pub value: String,
    pub reference: VarRef,
}

impl VariableSnapshot {
    pub fn new(name: impl Into<String>, value: impl Into<String>, reference: VarRef) -> Self {
        Self { name: name.into(), value: value.into(), reference }
    }
}

/// Une activation de la pile d'appels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameSnapshot {
    /// Nom de fonction (nom de débogage ou `fn#id`).
    pub function: String,
    pub source: SourceId,
    pub line: u32,
    pub base: FrameBase,
    /// Receveur de l'activation.
    pub this: VariableSnapshot,
    /// Paramètres puis locaux, dans l'ordre des slots.
    pub locals: Vec<VariableSnapshot>,
}

/// Thread vu par la cible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub state: ThreadState,
}

/// Interface que l'interpréteur fournit à la session.
///
/// Les frames sont rendues de la plus interne (index 0) à la plus externe.
pub trait DebugTarget {
    /// Active ou coupe l'appel des hooks `line`/`call`/`return`.
    fn set_hooks_enabled(&mut self, enabled: bool);

    /// Threads vivants.
    fn threads(&self) -> Vec<ThreadSnapshot>;

    /// Base de la frame courante de `thread`, `None` si le thread n'existe pas.
    fn frame_base(&self, thread: ThreadId) -> Option<FrameBase>;

    /// Pile d'appels de `thread` (vide si inconnu).
    fn frames(&self, thread: ThreadId) -> Vec<FrameSnapshot>;

    /// Membres de l'objet référencé par `reference`.
    fn variable(&self, reference: VarRef) -> Option<Vec<VariableSnapshot>>;

    /// Sources enregistrées (compilées en mode debug).
    fn sources(&self) -> Vec<SourceEntry>;

    /// Une source par identifiant.
    fn source(&self, id: SourceId) -> Option<SourceEntry> {
        self.sources().into_iter().find(|s| s.id == id)
    }

    /// Adresse du marqueur `line` de `(source, line)`, s'il existe.
    fn line_marker_address(&self, source: SourceId, line: u32) -> Option<CodeAddress>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_state_codes_round_trip() {
        for s in [
            ThreadState::Running,
            ThreadState::Blocked,
            ThreadState::Sleeping,
            ThreadState::Exception,
            ThreadState::Debug,
        ] {
            assert_eq!(ThreadState::from_code(s.code()), Some(s));
        }
        assert_eq!(ThreadState::from_code(9), None);
        assert_eq!(ThreadState::Debug.to_string(), "debug");
    }
}
