// crates/gmscript-tools/src/bin/gms-disasm.rs
//! Désassembleur gmscript pour conteneurs `.gmf`.
//!
//! Exemples :
//!   gms-disasm game.gmf
//!   gms-disasm a.gmf b.gmf --summary
//!   cat game.gmf | gms-disasm - --json | jq
//!
//! Options utiles :
//!   --summary     : résumé (fonctions, tables, sources)
//!   --json        : vue JSON structurée sur stdout
//!   --emit <f>    : écrit le désassemblage dans un fichier (1 entrée)
//!   --verify      : rejoue la pile, les branches, les lignes et le round-trip
//!   --time        : chrono
//!
//! Sans option de vue, le désassemblage est imprimé sur stdout.

use anyhow::{anyhow, Result};
use clap::Parser;

use gmscript_tools::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "gms-disasm", version, about = "Désassembleur gmscript (.gmf -> texte/JSON)")]
struct Cli {
    /// Fichier(s) .gmf (ou '-' pour stdin, unique)
    inputs: Vec<String>,

    /// Résumé rapide
    #[arg(long)]
    summary: bool,

    /// JSON structuré sur stdout
    #[arg(long)]
    json: bool,

    /// Chemin où écrire le désassemblage (si 1 entrée)
    #[arg(long)]
    emit: Option<PathBuf>,

    /// Valide chaque fonction et le round-trip du conteneur
    #[arg(long)]
    verify: bool,

    /// Nom logique quand l’entrée est '-' (stdin)
    #[arg(long, default_value = "<stdin>")]
    stdin_name: String,

    /// Affiche la durée de traitement
    #[arg(long)]
    time: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = real_main() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    if cli.inputs.is_empty() {
        return Err(anyhow!("aucune entrée. Exemple: gms-disasm a.gmf"));
    }
    if cli.inputs.len() > 1 && cli.emit.is_some() {
        return Err(anyhow!("--emit n'accepte qu'une entrée"));
    }
    for input in &cli.inputs {
        let (bytes, name) = if input == "-" {
            (read_stdin_to_bytes()?, Utf8PathBuf::from(&cli.stdin_name))
        } else {
            let p = Utf8PathBuf::from(input);
            (read_bytes(&p)?, p)
        };
        process_one(&bytes, &name, &cli)?;
    }
    Ok(())
}

fn process_one(bytes: &[u8], name: &Utf8Path, cli: &Cli) -> Result<()> {
    let timer = Timer::start();
    let image = ProgramImage::from_bytes(bytes).with_context(|| format!("chargement de {name}"))?;

    if cli.summary {
        eprintln!("== {name} ==");
        eprint!("{}", image.summary());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&image_json(&image)?)?);
    }

    if let Some(file) = &cli.emit {
        let out = to_utf8(file.clone())?;
        write_text(&out, &image.disassemble()?)?;
        eprintln!("disasm → {out}");
    } else if !cli.json && !cli.summary {
        print!("{}", image.disassemble()?);
    }

    if cli.verify {
        verify_image(&image).with_context(|| format!("vérification de {name}"))?;
        eprintln!("{name}: verify OK");
    }

    if cli.time {
        eprintln!("{}", timer.pretty());
    }
    Ok(())
}
