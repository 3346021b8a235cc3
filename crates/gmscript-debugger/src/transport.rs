//! transport.rs - Acheminement des messages entre session et débogueur
//!
//! Le protocole ne définit que le contenu des messages ; le transport livre
//! des messages entiers. `ChannelTransport` (côté interpréteur) et
//! `DebuggerLink` (côté débogueur) sont les deux bouts d'une paire de canaux
//! crossbeam, utilisables dans le même processus ou derrière un pont réseau.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::protocol::{Command, Event, ProtocolError, ProtocolResult};

/// Côté interpréteur : envoi bloquant, réception non bloquante.
pub trait Transport {
    /// Envoie un message complet.
    fn send(&mut self, message: Vec<u8>) -> ProtocolResult<()>;

    /// Prochain message reçu, `None` si la file est vide.
    fn try_recv(&mut self) -> ProtocolResult<Option<Vec<u8>>>;
}

/// Bout interpréteur d'une paire de canaux.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: Vec<u8>) -> ProtocolResult<()> {
        self.tx.send(message).map_err(|_| ProtocolError::Disconnected)
    }

    fn try_recv(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(m) => Ok(Some(m)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }
}

/// Bout débogueur : envoie des commandes, lit des événements.
#[derive(Debug, Clone)]
pub struct DebuggerLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl DebuggerLink {
    /// Envoie une commande encodée.
    pub fn send(&self, cmd: &Command) -> ProtocolResult<()> {
        log::trace!("debugger → {:?}", cmd);
        self.tx.send(cmd.to_bytes()).map_err(|_| ProtocolError::Disconnected)
    }

    /// Envoie des octets bruts (messages arbitraires, tests de robustesse).
    pub fn send_raw(&self, bytes: Vec<u8>) -> ProtocolResult<()> {
        self.tx.send(bytes).map_err(|_| ProtocolError::Disconnected)
    }

    /// Prochain événement disponible, sans attendre.
    pub fn try_event(&self) -> ProtocolResult<Option<Event>> {
        match self.rx.try_recv() {
            Ok(bytes) => Event::decode(&bytes).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }

    /// Attend un événement au plus `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> ProtocolResult<Option<Event>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Event::decode(&bytes).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }

    /// Vide la file d'événements ; les messages indécodables sont ignorés.
    pub fn drain(&self) -> Vec<Event> {
        self.rx
            .try_iter()
            .filter_map(|bytes| match Event::decode(&bytes) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    log::warn!("dropping undecodable event: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Paire connectée : (bout interpréteur, bout débogueur).
pub fn channel_pair() -> (ChannelTransport, DebuggerLink) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (ev_tx, ev_rx) = unbounded();
    (ChannelTransport { tx: ev_tx, rx: cmd_rx }, DebuggerLink { tx: cmd_tx, rx: ev_rx })
}
