//! gmscript-core - primitives partagées du compilateur et du débogueur
//!
//! Fournit :
//! - le jeu d'instructions fermé (`Opcode`) et son effet sur la pile
//! - l'émetteur de bytecode (`ByteCodeGen`) avec suivi de profondeur, `skip`/`seek`
//! - les flux mémoire (`StreamBuffer`, `FixedStream`, `StreamReader`, ordre natif)
//! - les métadonnées de fonctions (`FunctionInfo`, `LineInfo`) et leur image binaire
//! - le désassembleur et les validations (rejeu de pile, cibles de branches, table de lignes)
//! - la table des sources (`SourceTable`, identifiants CRC32)
//!
//! Features :
//! - `serde` : derive (dé)sérialisation sur les structures utiles

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Jeu d'instructions, émetteur, désassembleur, images de fonctions, validations.
pub mod bytecode;
/// Flux d'octets (écriture croissante/fixe, lecture) en ordre natif.
pub mod stream;
/// Sources enregistrées en mode debug.
pub mod source;

pub use bytecode::disasm;
pub use bytecode::helpers;
pub use bytecode::{
    pack_foreach, unpack_foreach, ByteCodeGen, EmitHook, FunctionInfo, ImageError, Instruction,
    LineInfo, NoHook, Opcode, Operand, OperandKind,
};
pub use source::{SourceEntry, SourceTable};
pub use stream::{ByteSink, FixedStream, StreamBuffer, StreamReader};

/* ─────────────────────────── Identifiants ─────────────────────────── */

/// Identifiant de source (CRC32 du texte source).
pub type SourceId = u32;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = Result<T, CoreError>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes (flux, décodage, validation).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Fin de buffer inattendue.
    #[error("unexpected end of stream: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d'octets manquants.
        needed: usize,
        /// Offset où l'erreur s'est produite.
        at: usize,
    },
    /// Écriture au-delà d'un buffer de taille fixe.
    #[error("fixed stream overflow: {requested} bytes at {at}, capacity {capacity}")]
    Overflow {
        /// Octets demandés.
        requested: usize,
        /// Offset de l'écriture.
        at: usize,
        /// Capacité du buffer.
        capacity: usize,
    },
    /// Tag d'instruction inconnu.
    #[error("unknown opcode tag 0x{raw:08X} at {at}")]
    UnknownOpcode {
        /// Valeur brute lue.
        raw: u32,
        /// Adresse de l'instruction.
        at: usize,
    },
    /// Chaîne sans terminateur NUL.
    #[error("unterminated string at {at}")]
    Unterminated {
        /// Offset du début de la chaîne.
        at: usize,
    },
    /// UTF-8 invalide.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// Données incohérentes (validation).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }
}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        ByteCodeGen, ByteSink, CoreError, CoreResult, EmitHook, FunctionInfo, Instruction, LineInfo,
        NoHook, Opcode, Operand, OperandKind, SourceId, SourceTable, StreamBuffer, StreamReader,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
