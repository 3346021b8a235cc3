//! breakpoint.rs - Table des points d'arrêt (adresse d'instruction → portée de thread)
//!
//! - Clé : `CodeAddress` (fonction + offset dans son bytecode). L'offset est
//!   celui de l'instruction qui *suit* le marqueur `line` de la ligne visée.
//! - Valeur : `Option<ThreadId>` ; `None` = tous les threads.
//! - Insérer une adresse déjà présente avec la même portée est accepté ;
//!   avec une autre portée, refusé (le client reçoit un ack négatif).

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::api::ThreadId;

/// Adresse d'une instruction : fonction et offset dans son bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeAddress {
    pub function: u64,
    pub offset: u32,
}

impl CodeAddress {
    pub const fn new(function: u64, offset: u32) -> Self { Self { function, offset } }

    /// Même fonction, `delta` octets plus loin.
    #[must_use]
    pub const fn offset_by(self, delta: u32) -> Self {
        Self { function: self.function, offset: self.offset + delta }
    }
}

impl fmt::Display for CodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}@{:04}", self.function, self.offset)
    }
}

/// Refus d'insertion ou de suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakpointError {
    #[error("breakpoint at {address} already set for {}", scope(.existing))]
    Conflict { address: CodeAddress, existing: Option<ThreadId> },
    #[error("no breakpoint at {0}")]
    Missing(CodeAddress),
}

fn scope(thread: &Option<ThreadId>) -> String {
    thread.map_or_else(|| "all threads".to_owned(), |t| format!("thread {t}"))
}

/// Points d'arrêt actifs.
#[derive(Debug, Clone, Default)]
pub struct BreakpointTable {
    entries: BTreeMap<CodeAddress, Option<ThreadId>>,
}

impl BreakpointTable {
    pub fn new() -> Self { Self::default() }

    /// Arme `address` pour `thread` (`None` = tous).
    pub fn insert(&mut self, address: CodeAddress, thread: Option<ThreadId>) -> Result<(), BreakpointError> {
        match self.entries.get(&address) {
            Some(&existing) if existing != thread => Err(BreakpointError::Conflict { address, existing }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(address, thread);
                Ok(())
            }
        }
    }

    /// Désarme `address`.
    pub fn remove(&mut self, address: CodeAddress) -> Result<Option<ThreadId>, BreakpointError> {
        self.entries.remove(&address).ok_or(BreakpointError::Missing(address))
    }

    /// Vrai si `thread` doit s'arrêter sur `address`.
    pub fn hit(&self, address: CodeAddress, thread: ThreadId) -> bool {
        match self.entries.get(&address) {
            Some(None) => true,
            Some(Some(only)) => *only == thread,
            None => false,
        }
    }

    pub fn contains(&self, address: CodeAddress) -> bool { self.entries.contains_key(&address) }

    pub fn clear(&mut self) { self.entries.clear(); }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Entrées triées par adresse.
    pub fn iter(&self) -> impl Iterator<Item = (CodeAddress, Option<ThreadId>)> + '_ {
        self.entries.iter().map(|(a, t)| (*a, *t))
    }
}

/* --------------------------------- Tests ---------------------------------- */
