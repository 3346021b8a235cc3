//! step.rs - Pas-à-pas par thread (into / over / out) au niveau des frames
//!
//! Chaque thread débogué porte un `ThreadDebugState` explicite :
//!   - `mode`      : Continue, Into, Over ou Out
//!   - `marker`    : base de la frame où le pas a été demandé
//!   - `suspended` : le thread attend une commande du débogueur
//!
//! Décisions (appelées depuis les hooks de l'interpréteur) :
//!   - ligne  : Into/Over s'arrêtent sur une nouvelle ligne de la frame marquée
//!   - appel  : Into passe dans la frame de l'appelé (arrêt sur sa première ligne)
//!   - retour : Into/Over/Out s'arrêtent quand la frame marquée se termine
//!
//! La comparaison au marqueur est ce qui fait sauter les appels imbriqués à
//! step-over : les lignes et retours d'une frame plus profonde n'ont pas la
//! même base.

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::api::{FrameBase, ThreadId};

/// Mode de step demandé par le client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StepMode {
    #[default]
    Continue,
    Over,
    Into,
    Out,
}

/// État de débogage d'un thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadDebugState {
    pub mode: StepMode,
    pub marker: Option<FrameBase>,
    pub suspended: bool,
}

impl ThreadDebugState {
    /// Démarre un pas depuis la frame `marker` et relâche le thread.
    pub fn begin(&mut self, mode: StepMode, marker: FrameBase) {
        *self = Self { mode, marker: Some(marker), suspended: false };
    }

    /// Arrête le thread ; le pas en cours est terminé.
    pub fn suspend(&mut self) {
        *self = Self { mode: StepMode::Continue, marker: None, suspended: true };
    }

    fn in_marker(&self, base: FrameBase) -> bool { self.marker == Some(base) }

    /// Nouvelle ligne exécutée dans la frame `base`.
    pub fn on_line(&self, base: FrameBase) -> bool {
        matches!(self.mode, StepMode::Into | StepMode::Over) && self.in_marker(base)
    }

    /// Entrée dans une fonction.
    pub fn on_call(&self) -> bool { self.mode == StepMode::Into }

    /// Sortie de la frame `base`.
    pub fn on_return(&self, base: FrameBase) -> bool {
        self.mode != StepMode::Continue && self.in_marker(base)
    }

    /// Aucun pas en cours, thread libre : l'état peut être oublié.
    pub fn is_idle(&self) -> bool { *self == Self::default() }
}

/// États par thread. Un thread absent est en `Continue`, non suspendu.
#[derive(Debug, Clone, Default)]
pub struct StepController {
    by_thread: HashMap<ThreadId, ThreadDebugState>,
}

impl StepController {
    pub fn new() -> Self { Self::default() }

    /// (Ré)initialise un pas pour `tid` depuis la frame `marker`.
    pub fn begin(&mut self, tid: ThreadId, mode: StepMode, marker: FrameBase) {
        self.by_thread.entry(tid).or_default().begin(mode, marker);
    }

    /// Relâche `tid` : plus de pas, plus de suspension.
    pub fn resume(&mut self, tid: ThreadId) { self.by_thread.remove(&tid); }

    /// Suspend `tid`.
    pub fn suspend(&mut self, tid: ThreadId) { self.by_thread.entry(tid).or_default().suspend(); }

    /// État courant (défaut si inconnu).
    pub fn state(&self, tid: ThreadId) -> ThreadDebugState {
        self.by_thread.get(&tid).copied().unwrap_or_default()
    }

    pub fn is_suspended(&self, tid: ThreadId) -> bool { self.state(tid).suspended }

    pub fn should_stop_on_line(&self, tid: ThreadId, base: FrameBase) -> bool { self.state(tid).on_line(base) }

    pub fn should_stop_on_call(&self, tid: ThreadId) -> bool { self.state(tid).on_call() }

    pub fn should_stop_on_return(&self, tid: ThreadId, base: FrameBase) -> bool {
        self.state(tid).on_return(base)
    }

    /// Threads suspendus.
    pub fn suspended(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.by_thread.iter().filter(|(_, s)| s.suspended).map(|(t, _)| *t)
    }

    /// Oublie tous les threads.
    pub fn clear(&mut self) { self.by_thread.clear(); }

    /// Nombre de threads avec un état non trivial.
    pub fn len(&self) -> usize { self.by_thread.values().filter(|s| !s.is_idle()).count() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_over_ignores_deeper_frames() {
        let mut sc = StepController::new();
        sc.begin(1, StepMode::Over, 10);
        // appel : pas d'arrêt à l'entrée, ni sur les lignes de l'appelé
        assert!(!sc.should_stop_on_call(1));
        assert!(!sc.should_stop_on_line(1, 14));
        assert!(!sc.should_stop_on_return(1, 14));
        // de retour dans la frame marquée
        assert!(sc.should_stop_on_line(1, 10));
    }

    #[test]
    fn step_into_stops_at_callee_entry_and_same_frame() {
        let mut sc = StepController::new();
        sc.begin(1, StepMode::Into, 10);
        assert!(sc.should_stop_on_call(1));
        assert!(sc.should_stop_on_line(1, 10));
        assert!(!sc.should_stop_on_line(1, 14));
    }

    #[test]
    fn step_out_waits_for_marker_return() {
        let mut sc = StepController::new();
        sc.begin(1, StepMode::Out, 10);
        assert!(!sc.should_stop_on_line(1, 10));
        assert!(!sc.should_stop_on_return(1, 14));
        assert!(sc.should_stop_on_return(1, 10));
    }

    #[test]
    fn suspend_ends_the_step() {
        let mut sc = StepController::new();
        sc.begin(2, StepMode::Over, 3);
        sc.suspend(2);
        assert_eq!(
            sc.state(2),
            ThreadDebugState { mode: StepMode::Continue, marker: None, suspended: true }
        );
        assert!(!sc.should_stop_on_line(2, 3));
        assert_eq!(sc.suspended().collect::<Vec<_>>(), vec![2]);
        sc.resume(2);
        assert!(!sc.is_suspended(2));
        assert!(sc.is_empty());
    }

    #[test]
    fn other_threads_are_unaffected() {
        let mut sc = StepController::new();
        sc.begin(1, StepMode::Into, 0);
        assert!(!sc.should_stop_on_call(2));
        assert!(!sc.should_stop_on_line(2, 0));
    }
}
