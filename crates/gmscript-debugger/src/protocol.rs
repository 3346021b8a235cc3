//! protocol.rs - Messages de la session de débogage (commandes et événements)
//!
//! Format d'un message :
//!   - tag ASCII de 4 octets (`mrun`, `dbrk`, ...)
//!   - champs dans un ordre fixe : entiers 32 bits en ordre natif, chaînes
//!     terminées par NUL
//!
//! Les frontières de message appartiennent au transport : un message = un
//! `Vec<u8>` complet. Commandes : débogueur → interpréteur (préfixe `m`).
//! Événements : interpréteur → débogueur.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use gmscript_core::{ByteSink, CoreError, SourceId, StreamBuffer, StreamReader};

use crate::api::{ThreadId, ThreadState, VarRef};

/* ------------------------------- Tags ------------------------------------ */

/// Tag de 4 octets ASCII en tête de chaque message.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag(pub [u8; 4]);

impl MessageTag {
    pub const fn new(tag: &[u8; 4]) -> Self { Self(*tag) }

    pub const fn as_bytes(&self) -> &[u8; 4] { &self.0 }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "'{self}'") }
}

/// Tags connus.
pub mod tags {
    use super::MessageTag;

    // commandes
    pub const RUN: MessageTag = MessageTag::new(b"mrun");
    pub const STEP_INTO: MessageTag = MessageTag::new(b"msin");
    pub const STEP_OVER: MessageTag = MessageTag::new(b"msov");
    pub const STEP_OUT: MessageTag = MessageTag::new(b"msou");
    pub const GET_CONTEXT: MessageTag = MessageTag::new(b"mgct");
    pub const GET_SOURCE: MessageTag = MessageTag::new(b"mgsr");
    pub const GET_SOURCE_INFO: MessageTag = MessageTag::new(b"mgsi");
    pub const GET_THREAD_INFO: MessageTag = MessageTag::new(b"mgti");
    pub const GET_VARIABLE_INFO: MessageTag = MessageTag::new(b"mgvi");
    pub const SET_BREAKPOINT: MessageTag = MessageTag::new(b"msbp");
    pub const FORCE_BREAK: MessageTag = MessageTag::new(b"mbrk");
    pub const END: MessageTag = MessageTag::new(b"mend");

    // événements
    pub const BREAK: MessageTag = MessageTag::new(b"dbrk");
    pub const EXCEPTION: MessageTag = MessageTag::new(b"dexc");
    pub const THREAD_STARTED: MessageTag = MessageTag::new(b"drun");
    pub const THREAD_STOPPED: MessageTag = MessageTag::new(b"dstp");
    pub const SOURCE: MessageTag = MessageTag::new(b"dsrc");
    pub const BEGIN_CONTEXT: MessageTag = MessageTag::new(b"dctx");
    pub const CONTEXT_CALL: MessageTag = MessageTag::new(b"call");
    pub const CONTEXT_VARIABLE: MessageTag = MessageTag::new(b"vari");
    pub const END_CONTEXT: MessageTag = MessageTag::new(b"ectx");
    pub const BEGIN_SOURCE_INFO: MessageTag = MessageTag::new(b"dsri");
    pub const SOURCE_INFO: MessageTag = MessageTag::new(b"srci");
    pub const END_SOURCE_INFO: MessageTag = MessageTag::new(b"esri");
    pub const BEGIN_THREAD_INFO: MessageTag = MessageTag::new(b"dthi");
    pub const THREAD_INFO: MessageTag = MessageTag::new(b"thri");
    pub const END_THREAD_INFO: MessageTag = MessageTag::new(b"ethi");
    pub const BEGIN_VARIABLE_INFO: MessageTag = MessageTag::new(b"dvar");
    pub const END_VARIABLE_INFO: MessageTag = MessageTag::new(b"evar");
    pub const ERROR: MessageTag = MessageTag::new(b"derr");
    pub const MESSAGE: MessageTag = MessageTag::new(b"dmsg");
    pub const ACK: MessageTag = MessageTag::new(b"dack");
    pub const SESSION_END: MessageTag = MessageTag::new(b"dend");
}

/* ------------------------------- Erreurs --------------------------------- */

/// Erreurs du fil.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown message tag {0}")]
    UnknownTag(MessageTag),
    #[error("malformed {tag} message: {source}")]
    Malformed {
        tag: MessageTag,
        #[source]
        source: CoreError,
    },
    #[error("{tag} message has {extra} trailing byte(s)")]
    Trailing { tag: MessageTag, extra: usize },
    #[error("transport disconnected")]
    Disconnected,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/* ------------------------------- Messages -------------------------------- */

/// Commandes débogueur → interpréteur.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Command {
    Run { thread: ThreadId },
    StepInto { thread: ThreadId },
    StepOver { thread: ThreadId },
    StepOut { thread: ThreadId },
    /// Pile de `thread` avec les variables de la frame `frame` (0 = la plus interne).
    GetContext { thread: ThreadId, frame: u32 },
    GetSource { source: SourceId },
    GetSourceInfo,
    GetThreadInfo,
    GetVariableInfo { reference: VarRef },
    /// `thread == 0` : tous les threads.
    SetBreakpoint { response: u32, source: SourceId, line: u32, thread: ThreadId, enabled: bool },
    ForceBreak { thread: ThreadId },
    End,
}

/// Événements interpréteur → débogueur.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Event {
    Break { thread: ThreadId, source: SourceId, line: u32 },
    Exception { thread: ThreadId },
    ThreadStarted { thread: ThreadId },
    ThreadStopped { thread: ThreadId },
    Source { id: SourceId, name: String, text: String },
    BeginContext { thread: ThreadId, frame: u32 },
    ContextCall {
        frame: u32,
        function: String,
        source: SourceId,
        line: u32,
        this_name: String,
        this_value: String,
        this_reference: VarRef,
    },
    ContextVariable { name: String, value: String, reference: VarRef },
    EndContext,
    BeginSourceInfo,
    SourceInfo { id: SourceId, name: String },
    EndSourceInfo,
    BeginThreadInfo,
    ThreadInfo { thread: ThreadId, state: ThreadState },
    EndThreadInfo,
    BeginVariableInfo { reference: VarRef },
    EndVariableInfo,
    Error(String),
    Message(String),
    Ack { response: u32, ok: bool },
    SessionEnd,
}

/* ------------------------------- Encodage -------------------------------- */

fn put_bool(out: &mut impl ByteSink, b: bool) -> Result<(), CoreError> { out.put_u32(u32::from(b)) }

impl Command {
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Run { .. } => tags::RUN,
            Self::StepInto { .. } => tags::STEP_INTO,
            Self::StepOver { .. } => tags::STEP_OVER,
            Self::StepOut { .. } => tags::STEP_OUT,
            Self::GetContext { .. } => tags::GET_CONTEXT,
            Self::GetSource { .. } => tags::GET_SOURCE,
            Self::GetSourceInfo => tags::GET_SOURCE_INFO,
            Self::GetThreadInfo => tags::GET_THREAD_INFO,
            Self::GetVariableInfo { .. } => tags::GET_VARIABLE_INFO,
            Self::SetBreakpoint { .. } => tags::SET_BREAKPOINT,
            Self::ForceBreak { .. } => tags::FORCE_BREAK,
            Self::End => tags::END,
        }
    }

    /// Écrit le message complet (tag + champs).
    pub fn encode(&self, out: &mut impl ByteSink) -> Result<(), CoreError> {
        out.put_bytes(self.tag().as_bytes())?;
        match *self {
            Self::Run { thread }
            | Self::StepInto { thread }
            | Self::StepOver { thread }
            | Self::StepOut { thread }
            | Self::ForceBreak { thread } => out.put_u32(thread),
            Self::GetContext { thread, frame } => {
                out.put_u32(thread)?;
                out.put_u32(frame)
            }
            Self::GetSource { source } => out.put_u32(source),
            Self::GetVariableInfo { reference } => out.put_u32(reference),
            Self::SetBreakpoint { response, source, line, thread, enabled } => {
                out.put_u32(response)?;
                out.put_u32(source)?;
                out.put_u32(line)?;
                out.put_u32(thread)?;
                put_bool(out, enabled)
            }
            Self::GetSourceInfo | Self::GetThreadInfo | Self::End => Ok(()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = StreamBuffer::new();
        // un StreamBuffer grandit : l'écriture ne peut pas échouer
        let _ = self.encode(&mut buf);
        buf.into_vec()
    }

    /// Décode un message complet.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let (tag, mut r) = split(bytes)?;
        let cmd = read_fields(tag, &mut r, |r| {
            Ok(match tag {
                tags::RUN => Self::Run { thread: r.read_u32()? },
                tags::STEP_INTO => Self::StepInto { thread: r.read_u32()? },
                tags::STEP_OVER => Self::StepOver { thread: r.read_u32()? },
                tags::STEP_OUT => Self::StepOut { thread: r.read_u32()? },
                tags::GET_CONTEXT => Self::GetContext { thread: r.read_u32()?, frame: r.read_u32()? },
                tags::GET_SOURCE => Self::GetSource { source: r.read_u32()? },
                tags::GET_SOURCE_INFO => Self::GetSourceInfo,
                tags::GET_THREAD_INFO => Self::GetThreadInfo,
                tags::GET_VARIABLE_INFO => Self::GetVariableInfo { reference: r.read_u32()? },
                tags::SET_BREAKPOINT => Self::SetBreakpoint {
                    response: r.read_u32()?,
                    source: r.read_u32()?,
                    line: r.read_u32()?,
                    thread: r.read_u32()?,
                    enabled: r.read_u32()? != 0,
                },
                tags::FORCE_BREAK => Self::ForceBreak { thread: r.read_u32()? },
                tags::END => Self::End,
                _ => return Ok(None),
            })
            .map(Some)
        })?;
        cmd.ok_or(ProtocolError::UnknownTag(tag))
    }
}

impl Event {
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Break { .. } => tags::BREAK,
            Self::Exception { .. } => tags::EXCEPTION,
            Self::ThreadStarted { .. } => tags::THREAD_STARTED,
            Self::ThreadStopped { .. } => tags::THREAD_STOPPED,
            Self::Source { .. } => tags::SOURCE,
            Self::BeginContext { .. } => tags::BEGIN_CONTEXT,
            Self::ContextCall { .. } => tags::CONTEXT_CALL,
            Self::ContextVariable { .. } => tags::CONTEXT_VARIABLE,
            Self::EndContext => tags::END_CONTEXT,
            Self::BeginSourceInfo => tags::BEGIN_SOURCE_INFO,
            Self::SourceInfo { .. } => tags::SOURCE_INFO,
            Self::EndSourceInfo => tags::END_SOURCE_INFO,
            Self::BeginThreadInfo => tags::BEGIN_THREAD_INFO,
            Self::ThreadInfo { .. } => tags::THREAD_INFO,
            Self::EndThreadInfo => tags::END_THREAD_INFO,
            Self::BeginVariableInfo { .. } => tags::BEGIN_VARIABLE_INFO,
            Self::EndVariableInfo => tags::END_VARIABLE_INFO,
            Self::Error(_) => tags::ERROR,
            Self::Message(_) => tags::MESSAGE,
            Self::Ack { .. } => tags::ACK,
            Self::SessionEnd => tags::SESSION_END,
        }
    }

    /// Écrit le message complet (tag + champs).
    pub fn encode(&self, out: &mut impl ByteSink) -> Result<(), CoreError> {
        out.put_bytes(self.tag().as_bytes())?;
        match self {
            Self::Break { thread, source, line } => {
                out.put_u32(*thread)?;
                out.put_u32(*source)?;
                out.put_u32(*line)
            }
            Self::Exception { thread } | Self::ThreadStarted { thread } | Self::ThreadStopped { thread } => {
                out.put_u32(*thread)
            }
            Self::Source { id, name, text } => {
                out.put_u32(*id)?;
                out.put_cstr(name)?;
                out.put_cstr(text)
            }
            Self::BeginContext { thread, frame } => {
                out.put_u32(*thread)?;
                out.put_u32(*frame)
            }
            Self::ContextCall { frame, function, source, line, this_name, this_value, this_reference } => {
                out.put_u32(*frame)?;
                out.put_cstr(function)?;
                out.put_u32(*source)?;
                out.put_u32(*line)?;
                out.put_cstr(this_name)?;
                out.put_cstr(this_value)?;
                out.put_u32(*this_reference)
            }
            Self::ContextVariable { name, value, reference } => {
                out.put_cstr(name)?;
                out.put_cstr(value)?;
                out.put_u32(*reference)
            }
            Self::SourceInfo { id, name } => {
                out.put_u32(*id)?;
                out.put_cstr(name)
            }
            Self::ThreadInfo { thread, state } => {
                out.put_u32(*thread)?;
                out.put_u32(state.code())
            }
            Self::BeginVariableInfo { reference } => out.put_u32(*reference),
            Self::Error(text) | Self::Message(text) => out.put_cstr(text),
            Self::Ack { response, ok } => {
                out.put_u32(*response)?;
                put_bool(out, *ok)
            }
            Self::EndContext
            | Self::BeginSourceInfo
            | Self::EndSourceInfo
            | Self::BeginThreadInfo
            | Self::EndThreadInfo
            | Self::EndVariableInfo
            | Self::SessionEnd => Ok(()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = StreamBuffer::new();
        let _ = self.encode(&mut buf);
        buf.into_vec()
    }

    /// Décode un message complet.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let (tag, mut r) = split(bytes)?;
        let ev = read_fields(tag, &mut r, |r| {
            let s = |r: &mut StreamReader<'_>| r.read_cstr().map(str::to_owned);
            Ok(Some(match tag {
                tags::BREAK => Self::Break { thread: r.read_u32()?, source: r.read_u32()?, line: r.read_u32()? },
                tags::EXCEPTION => Self::Exception { thread: r.read_u32()? },
                tags::THREAD_STARTED => Self::ThreadStarted { thread: r.read_u32()? },
                tags::THREAD_STOPPED => Self::ThreadStopped { thread: r.read_u32()? },
                tags::SOURCE => Self::Source { id: r.read_u32()?, name: s(r)?, text: s(r)? },
                tags::BEGIN_CONTEXT => Self::BeginContext { thread: r.read_u32()?, frame: r.read_u32()? },
                tags::CONTEXT_CALL => Self::ContextCall {
                    frame: r.read_u32()?,
                    function: s(r)?,
                    source: r.read_u32()?,
                    line: r.read_u32()?,
                    this_name: s(r)?,
                    this_value: s(r)?,
                    this_reference: r.read_u32()?,
                },
                tags::CONTEXT_VARIABLE => {
                    Self::ContextVariable { name: s(r)?, value: s(r)?, reference: r.read_u32()? }
                }
                tags::END_CONTEXT => Self::EndContext,
                tags::BEGIN_SOURCE_INFO => Self::BeginSourceInfo,
                tags::SOURCE_INFO => Self::SourceInfo { id: r.read_u32()?, name: s(r)? },
                tags::END_SOURCE_INFO => Self::EndSourceInfo,
                tags::BEGIN_THREAD_INFO => Self::BeginThreadInfo,
                tags::THREAD_INFO => {
                    let thread = r.read_u32()?;
                    let code = r.read_u32()?;
                    let state = ThreadState::from_code(code)
                        .ok_or_else(|| CoreError::corrupted(format!("invalid thread state {code}")))?;
                    Self::ThreadInfo { thread, state }
                }
                tags::END_THREAD_INFO => Self::EndThreadInfo,
                tags::BEGIN_VARIABLE_INFO => Self::BeginVariableInfo { reference: r.read_u32()? },
                tags::END_VARIABLE_INFO => Self::EndVariableInfo,
                tags::ERROR => Self::Error(s(r)?),
                tags::MESSAGE => Self::Message(s(r)?),
                tags::ACK => Self::Ack { response: r.read_u32()?, ok: r.read_u32()? != 0 },
                tags::SESSION_END => Self::SessionEnd,
                _ => return Ok(None),
            }))
        })?;
        ev.ok_or(ProtocolError::UnknownTag(tag))
    }
}

/* ------------------------------- Lecture --------------------------------- */

fn split(bytes: &[u8]) -> ProtocolResult<(MessageTag, StreamReader<'_>)> {
    let Some((head, _)) = bytes.split_first_chunk::<4>() else {
        return Err(if bytes.is_empty() {
            ProtocolError::Empty
        } else {
            ProtocolError::Malformed {
                tag: MessageTag::new(b"????"),
                source: CoreError::UnexpectedEof { needed: 4 - bytes.len(), at: 0 },
            }
        });
    };
    let mut r = StreamReader::new(bytes);
    r.set_offset(4);
    Ok((MessageTag(*head), r))
}

/// Lit les champs avec `f` puis vérifie qu'il ne reste rien.
/// `f` renvoie `None` pour un tag inconnu.
fn read_fields<T>(
    tag: MessageTag,
    r: &mut StreamReader<'_>,
    f: impl FnOnce(&mut StreamReader<'_>) -> Result<Option<T>, CoreError>,
) -> ProtocolResult<Option<T>> {
    let out = f(r).map_err(|source| ProtocolError::Malformed { tag, source })?;
    if out.is_some() && r.remaining() > 0 {
        return Err(ProtocolError::Trailing { tag, extra: r.remaining() });
    }
    Ok(out)
}

/* --------------------------------- Tests ---------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tags_are_ascii_on_the_wire() {
        let bytes = Command::Run { thread: 7 }.to_bytes();
        assert_eq!(&bytes[..4], b"mrun");
        assert_eq!(&bytes[4..], &7u32.to_ne_bytes());
        assert_eq!(tags::BREAK.to_string(), "dbrk");
    }

    #[test]
    fn set_breakpoint_layout() {
        let cmd = Command::SetBreakpoint { response: 9, source: 0xDEAD_BEEF, line: 12, thread: 0, enabled: true };
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), 4 + 5 * 4);
        assert_eq!(&bytes[8..12], &0xDEAD_BEEFu32.to_ne_bytes());
        assert_eq!(Command::decode(&bytes), Ok(cmd));
    }

    #[test]
    fn strings_are_nul_terminated() {
        let ev = Event::ContextVariable { name: "a".into(), value: "1".into(), reference: 0 };
        let bytes = ev.to_bytes();
        assert_eq!(&bytes[4..8], b"a\x001\x00");
        assert_eq!(Event::decode(&bytes), Ok(ev));
    }

    #[test]
    fn interior_nul_truncates_the_field() {
        let ev = Event::ContextVariable { name: "s".into(), value: "a\0b".into(), reference: 4 };
        assert_eq!(
            Event::decode(&ev.to_bytes()),
            Ok(Event::ContextVariable { name: "s".into(), value: "a".into(), reference: 4 })
        );
        let msg = Event::Message("line\0rest".into());
        assert_eq!(Event::decode(&msg.to_bytes()), Ok(Event::Message("line".into())));
    }

    #[test]
    fn context_call_decodes() {
        let ev = Event::ContextCall {
            frame: 1,
            function: "update".into(),
            source: 3,
            line: 40,
            this_name: "this".into(),
            this_value: "table".into(),
            this_reference: 12,
        };
        assert_eq!(Event::decode(&ev.to_bytes()), Ok(ev));
    }

    #[test]
    fn unknown_and_malformed_messages() {
        assert_eq!(Command::decode(b""), Err(ProtocolError::Empty));
        assert_eq!(Command::decode(b"zzzz"), Err(ProtocolError::UnknownTag(MessageTag::new(b"zzzz"))));
        assert!(matches!(
            Command::decode(b"mrun\x01"),
            Err(ProtocolError::Malformed { tag: tags::RUN, .. })
        ));
        let mut extra = Command::End.to_bytes();
        extra.push(0);
        assert_eq!(Command::decode(&extra), Err(ProtocolError::Trailing { tag: tags::END, extra: 1 }));
        // un événement n'est pas une commande
        assert!(matches!(Command::decode(&Event::SessionEnd.to_bytes()), Err(ProtocolError::UnknownTag(_))));
    }

    #[test]
    fn thread_state_is_checked() {
        let mut bytes = Event::ThreadInfo { thread: 1, state: ThreadState::Debug }.to_bytes();
        assert_eq!(
            Event::decode(&bytes),
            Ok(Event::ThreadInfo { thread: 1, state: ThreadState::Debug })
        );
        bytes[8..12].copy_from_slice(&77u32.to_ne_bytes());
        assert!(matches!(
            Event::decode(&bytes),
            Err(ProtocolError::Malformed { tag: tags::THREAD_INFO, source: CoreError::Corrupted(_) })
        ));
    }
}
