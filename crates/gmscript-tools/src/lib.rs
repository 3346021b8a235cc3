//! gmscript-tools - Bibliothèque commune pour les outils CLI gmscript.
//!
//! Objectifs : mutualiser I/O, chrono, compilation d'arbres JSON, conteneur
//! `.gmf`, vues texte/JSON et vérification.
//!
//! ## Modules & zones clés
//! - `prelude` : import rapide des types/fns usuels
//! - I/O       : `read_text`, `read_bytes`, `read_stdin_*`, `write_text`, `write_bytes`
//! - Time      : `Timer`, `human_millis`
//! - Compile   : `parse_unit`, `compile_unit`
//! - Image     : `ProgramImage` (conteneur `.gmf`)
//! - Vues      : `image_json`, `verify_image`
//!
//! Les fonctions rendent des `anyhow::Result` avec contexte.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use gmscript_ast::Node;
use gmscript_compiler::{Compiler, CompilerOptions, Diagnostic, ProgramHooks};
use gmscript_core::disasm::instructions;
use gmscript_core::helpers::validate_function;
use gmscript_core::{FunctionInfo, Opcode, Operand};

pub mod image;

pub use image::{ProgramImage, ProgramImageError};

/// Version lisible du crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Petite bannière de version utile pour logs/outils.
pub fn version_banner(tool: &str) -> String { format!("{tool} - gmscript-tools {VERSION}") }

/* ------------------------------------------------------------------------- */
/* Prelude                                                                   */
/* ------------------------------------------------------------------------- */

/// Prelude pratique pour les bins: re-exports compacts.
pub mod prelude {
    pub use crate::{
        compile_unit, default_out_path, human_millis, image_json, parse_unit, read_bytes,
        read_stdin_to_bytes, read_stdin_to_string, read_text, to_utf8, verify_image,
        version_banner, write_bytes, write_text, CompileOutput, ProgramImage, Timer,
    };
    pub use anyhow::{anyhow, Context, Result};
    pub use camino::{Utf8Path, Utf8PathBuf};
    pub use std::path::PathBuf;
}

/* ------------------------------------------------------------------------- */
/* I/O utils                                                                 */
/* ------------------------------------------------------------------------- */

/// Lis un fichier texte en UTF-8.
pub fn read_text(path: &Utf8Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("lecture {path}"))
}

/// Lis un fichier binaire.
pub fn read_bytes(path: &Utf8Path) -> Result<Vec<u8>> { fs::read(path).with_context(|| format!("lecture {path}")) }

/// Lis tout `stdin` en String (UTF-8).
pub fn read_stdin_to_string() -> Result<String> {
    let mut s = String::new();
    io::stdin().read_to_string(&mut s)?;
    Ok(s)
}

/// Lis tout `stdin` en bytes.
pub fn read_stdin_to_bytes() -> Result<Vec<u8>> {
    let mut v = Vec::new();
    io::stdin().read_to_end(&mut v)?;
    Ok(v)
}

/// Écrit un texte (UTF-8). Crée les dossiers au besoin.
pub fn write_text(path: &Utf8Path, s: &str) -> Result<()> { write_bytes(path, s.as_bytes()) }

/// Écrit des bytes. Crée les dossiers au besoin.
pub fn write_bytes(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut f = fs::File::create(path).with_context(|| format!("création {path}"))?;
    f.write_all(bytes)?;
    Ok(())
}

/// Convertit un `PathBuf` en `Utf8PathBuf` (erreur si non UTF-8).
pub fn to_utf8(p: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(p).map_err(|_| anyhow!("chemin non UTF-8"))
}

/// Remplace l’extension par `ext` (sans point), ex: `gmf`.
pub fn default_out_path(input: &Utf8Path, ext: &str) -> Utf8PathBuf { input.with_extension(ext) }

/* ------------------------------------------------------------------------- */
/* Time / chrono                                                             */
/* ------------------------------------------------------------------------- */

/// Chrono de scope simple; loggable ensuite.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Démarre un chrono.
    pub fn start() -> Self { Self { start: Instant::now() } }
    /// Durée écoulée.
    pub fn elapsed(&self) -> Duration { self.start.elapsed() }
    /// Format humain court.
    pub fn pretty(&self) -> String { human_millis(self.elapsed()) }
}

/// Format "humain" d'une durée.
pub fn human_millis(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        return format!("{ms} ms");
    }
    let s = d.as_secs_f64();
    if s < 60.0 {
        return format!("{s:.3} s");
    }
    let m = (s / 60.0).floor();
    let rest = s - m * 60.0;
    format!("{m:.0} min {rest:.1} s")
}

/* ------------------------------------------------------------------------- */
/* Compilation                                                               */
/* ------------------------------------------------------------------------- */

/// Lit un arbre d'unité au format JSON (sérialisation serde de `Node`).
pub fn parse_unit(json: &str) -> Result<Node> { serde_json::from_str(json).context("arbre JSON invalide") }

/// Résultat d'une compilation : image si succès, diagnostics dans tous les cas.
#[derive(Debug)]
pub struct CompileOutput {
    pub image: Option<ProgramImage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool { self.image.is_some() }
}

/// Compile `unit` ; `source` = (nom, texte) enregistré en mode debug.
pub fn compile_unit(unit: &Node, options: CompilerOptions, source: Option<(&str, &str)>) -> CompileOutput {
    let mut hooks = ProgramHooks::new();
    if let Some((name, text)) = source {
        hooks = hooks.with_source(name, text);
    }
    let mut compiler = Compiler::new(options);
    match compiler.compile(unit, &mut hooks) {
        Ok(root) => {
            log::debug!("compiled unit, root fn#{root}");
            CompileOutput { image: Some(hooks.finish().into()), diagnostics: compiler.take_diagnostics() }
        }
        Err(e) => {
            log::debug!("{e}");
            CompileOutput { image: None, diagnostics: e.diagnostics }
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Vérification                                                              */
/* ------------------------------------------------------------------------- */

/// Rejoue chaque fonction (pile, branches, table des lignes) et vérifie le
/// round-trip du conteneur.
pub fn verify_image(image: &ProgramImage) -> Result<()> {
    for f in &image.functions {
        let report = validate_function(f).with_context(|| format!("fonction {}", f.display_name()))?;
        log::trace!("{}: max depth {}", f.display_name(), report.max_depth);
    }
    if let Some(root) = image.root {
        if image.function(root).is_none() {
            return Err(anyhow!("fonction racine fn#{root} absente"));
        }
    }
    let again = ProgramImage::from_bytes(&image.to_bytes())?;
    if &again != image {
        return Err(anyhow!("round-trip du conteneur divergent"));
    }
    Ok(())
}

/* ------------------------------------------------------------------------- */
/* Vue JSON                                                                  */
/* ------------------------------------------------------------------------- */

#[derive(Serialize)]
struct ImageJson<'a> {
    root: Option<u64>,
    symbols: &'a [String],
    strings: &'a [String],
    sources: Vec<SourceJson<'a>>,
    functions: Vec<FunctionJson>,
}

#[derive(Serialize)]
struct SourceJson<'a> {
    id: u32,
    name: &'a str,
    lines: usize,
}

#[derive(Serialize)]
struct FunctionJson {
    id: u64,
    name: String,
    root: bool,
    params: u32,
    locals: u32,
    max_stack: u32,
    symbols: Option<Vec<String>>,
    hash: u64,
    code: Vec<InsJson>,
}

#[derive(Serialize)]
struct InsJson {
    address: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    op: &'static str,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    operand: serde_json::Value,
    /// Nom résolu (symbole, chaîne, fonction, slot).
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

fn note_for(image: &ProgramImage, f: &FunctionInfo, op: Opcode, operand: Operand) -> Option<String> {
    match (op, operand) {
        (
            Opcode::GetDot | Opcode::SetDot | Opcode::GetGlobal | Opcode::SetGlobal | Opcode::GetThis | Opcode::SetThis,
            Operand::Ptr(id),
        ) => image.symbol(id).map(str::to_owned),
        (Opcode::PushString, Operand::Ptr(id)) => image.string(id).map(|s| format!("{s:?}")),
        (Opcode::PushFunction, Operand::Ptr(id)) => image.function(id).map(FunctionInfo::display_name),
        (Opcode::GetLocal | Opcode::SetLocal, Operand::Int(slot)) => {
            u32::try_from(slot).ok().and_then(|s| f.symbol(s)).map(str::to_owned)
        }
        _ => None,
    }
}

fn function_json(image: &ProgramImage, f: &FunctionInfo) -> Result<FunctionJson> {
    let mut code = Vec::new();
    for ins in instructions(&f.byte_code) {
        let ins = ins.with_context(|| format!("décodage de {}", f.display_name()))?;
        let operand = match ins.operand {
            Operand::None => serde_json::Value::Null,
            Operand::Int(v) => serde_json::json!(v),
            Operand::Float(v) => serde_json::json!(v),
            Operand::Ptr(v) => serde_json::json!(v),
        };
        code.push(InsJson {
            address: ins.address,
            line: f.line_for_address(ins.address),
            op: ins.opcode.mnemonic(),
            operand,
            note: note_for(image, f, ins.opcode, ins.operand),
        });
    }
    Ok(FunctionJson {
        id: f.id,
        name: f.display_name(),
        root: f.root,
        params: f.num_params,
        locals: f.num_locals,
        max_stack: f.max_stack,
        symbols: f.symbols.clone(),
        hash: f.compute_hash(),
        code,
    })
}

/// Vue JSON structurée d'un conteneur.
pub fn image_json(image: &ProgramImage) -> Result<serde_json::Value> {
    let view = ImageJson {
        root: image.root,
        symbols: &image.symbols,
        strings: &image.strings,
        sources: image
            .sources
            .iter()
            .map(|s| SourceJson { id: s.id, name: &s.name, lines: s.text.lines().count() })
            .collect(),
        functions: image.functions.iter().map(|f| function_json(image, f)).collect::<Result<_>>()?,
    };
    Ok(serde_json::to_value(view)?)
}
