// src/lib.rs
//! gmscript Compiler - génération de bytecode
//!
//! - Entrée : `gmscript_ast::Node` (racine d'une unité de compilation)
//! - Sortie : une `FunctionInfo` par fonction, livrée aux [`CodeGenHooks`]
//! - Diagnostics : erreurs/warnings collectés avec leur ligne
//! - Variables Local/Member/Global, étiquettes à patch différé, tables de lignes
//!
//! Une unité qui échoue ne livre aucune fonction : les fonctions terminées
//! sont retenues jusqu'à la fin de la génération.
//!
//! Features :
//! - `serde` (options et métadonnées sérialisables)
//!
//! API principale :
//! ```
//! use gmscript_ast::build::{assign, binary, ident, int, stmt, block};
//! use gmscript_ast::Operator;
//! use gmscript_compiler::{Compiler, CompilerOptions, ProgramHooks};
//!
//! let unit = block(vec![
//!     stmt(assign(ident("a"), int(1))),
//!     stmt(assign(ident("b"), binary(Operator::Add, ident("a"), int(2)))),
//! ]);
//! let mut hooks = ProgramHooks::new();
//! let mut c = Compiler::new(CompilerOptions::default());
//! let root = c.compile(&unit, &mut hooks).unwrap();
//! let program = hooks.finish();
//! assert_eq!(program.root, Some(root));
//! ```

#![deny(missing_docs)]

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use gmscript_ast::Node;

mod codegen;
/// Interface vers l'hôte : identifiants et réception des fonctions.
pub mod hooks;
/// Étiquettes de branchement et chaînes de patch des boucles.
pub mod labels;
/// État de compilation d'une fonction.
pub mod state;
/// Table des variables d'une fonction.
pub mod vars;

pub use hooks::{CodeGenHooks, HookError, Program, ProgramHooks};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Receveur poussé pour un appel sans receveur explicite ni callee pointé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReceiverPolicy {
    /// Toujours `push-this`.
    #[default]
    CurrentThis,
    /// `push-this` seulement si le callee est un membre, sinon `push-null`.
    MemberOnly,
}

/// Options du compilateur
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompilerOptions {
    /// Marqueurs `line`, table des lignes et noms des slots.
    pub debug: bool,
    /// Politique de receveur des appels.
    pub receiver: ReceiverPolicy,
    /// Nom de débogage de la fonction racine.
    pub root_name: String,
    /// Warnings traités comme erreurs.
    pub deny_warnings: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            receiver: ReceiverPolicy::default(),
            root_name: "__main".to_owned(),
            deny_warnings: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Diagnostics */
// ─────────────────────────────────────────────────────────────────────────────

/// Gravité d'un diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Severity {
    /// Alerte
    Warning,
    /// Erreur de compilation
    Error,
    /// Invariant interne violé (arbre impossible, étiquette non résolue)
    Internal,
}

/// Un diagnostic (gravité, ligne, message)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostic {
    /// Gravité
    pub severity: Severity,
    /// Ligne source (0 si inconnue)
    pub line: u32,
    /// Message humain
    pub message: String,
}

impl Diagnostic {
    /// Construit une erreur
    pub fn error(line: u32, msg: impl Into<String>) -> Self {
        Self { severity: Severity::Error, line, message: msg.into() }
    }
    /// Construit un warning
    pub fn warn(line: u32, msg: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, line, message: msg.into() }
    }
    /// Construit une erreur interne
    pub fn internal(line: u32, msg: impl Into<String>) -> Self {
        Self { severity: Severity::Internal, line, message: msg.into() }
    }
    /// Vrai pour `Error` et `Internal`.
    pub fn is_error(&self) -> bool { self.severity >= Severity::Error }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Internal => "internal error",
        };
        write!(f, "line {}: {sev}: {}", self.line, self.message)
    }
}

/// Erreur globale de compilation
#[derive(Debug, Clone, thiserror::Error)]
#[error("compilation failed with {} error(s)", self.error_count())]
pub struct CompileError {
    /// Diagnostics accumulés
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    /// Nombre de diagnostics bloquants.
    pub fn error_count(&self) -> usize { self.diagnostics.iter().filter(|d| d.is_error()).count() }
}

type CompileResult<T> = Result<T, CompileError>;

// ─────────────────────────────────────────────────────────────────────────────
/* Compiler façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Le compilateur : génère une unité puis livre ses fonctions aux hooks.
pub struct Compiler {
    /// Options
    pub options: CompilerOptions,
    diags: Vec<Diagnostic>,
}

impl Compiler {
    /// Crée un compilateur
    pub fn new(options: CompilerOptions) -> Self { Self { options, diags: Vec::new() } }

    /// Compile une unité ; renvoie l'id de la fonction racine.
    ///
    /// `hooks.begin` et `hooks.end` encadrent toujours la compilation ;
    /// `add_function` n'est appelé que si l'unité entière a réussi.
    pub fn compile(&mut self, unit: &Node, hooks: &mut dyn CodeGenHooks) -> CompileResult<u64> {
        self.diags.clear();
        hooks.begin(self.options.debug);

        let out = codegen::generate(&self.options, hooks, unit);
        self.diags = out.diagnostics;

        let has_errors = self.diags.iter().any(Diagnostic::is_error);
        let has_warnings = self.diags.iter().any(|d| d.severity == Severity::Warning);
        let mut failed = has_errors || (self.options.deny_warnings && has_warnings);

        if !failed {
            for info in out.functions {
                let id = info.id;
                if let Err(e) = hooks.add_function(info) {
                    self.diags.push(Diagnostic::error(0, format!("function {id} rejected: {e}")));
                    failed = true;
                    break;
                }
            }
        }

        let errors = if failed {
            self.diags.iter().filter(|d| d.is_error()).count().max(1)
        } else {
            0
        };
        hooks.end(errors);

        for d in &self.diags {
            log::debug!("{d}");
        }
        match out.root {
            Some(root) if !failed => Ok(root),
            _ => Err(CompileError { diagnostics: std::mem::take(&mut self.diags) }),
        }
    }

    /// Récupère et vide les diagnostics accumulés (warnings d'une compilation réussie)
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> { std::mem::take(&mut self.diags) }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use gmscript_ast::build::*;

    #[test]
    fn diagnostic_display() {
        assert_eq!(Diagnostic::error(4, "bad").to_string(), "line 4: error: bad");
        assert!(Diagnostic::internal(0, "x").is_error());
        assert!(!Diagnostic::warn(0, "x").is_error());
    }

    #[test]
    fn deny_warnings_turns_warning_into_failure() {
        let unit = block(vec![local("a"), global("a")]);
        let mut hooks = ProgramHooks::new();
        let mut c = Compiler::new(CompilerOptions::default());
        assert!(c.compile(&unit, &mut hooks).is_ok());
        assert_eq!(c.take_diagnostics().len(), 1);

        let mut hooks = ProgramHooks::new();
        let mut c = Compiler::new(CompilerOptions { deny_warnings: true, ..CompilerOptions::default() });
        let err = c.compile(&unit, &mut hooks).unwrap_err();
        assert_eq!(err.diagnostics[0].severity, Severity::Warning);
        assert!(hooks.finish().functions.is_empty());
    }
}
