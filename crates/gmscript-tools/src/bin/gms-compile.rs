// crates/gmscript-tools/src/bin/gms-compile.rs
//! Compilateur gmscript : arbre JSON → conteneur `.gmf`.
//!
//! Exemples :
//!   gms-compile game.json
//!   gms-compile game.json --debug --source game.gm -o build/game.gmf
//!   cat game.json | gms-compile - --stdin-name game.json --disasm
//!
//! Options utiles :
//!   --debug           : marqueurs `line`, table des lignes, noms des slots
//!   --source <f>      : texte source enregistré avec le programme (debug)
//!   --receiver <p>    : current-this|member-only
//!   --root-name <n>   : nom de débogage de la fonction racine
//!   --deny-warnings   : échec sur warning
//!   --disasm          : imprime le désassemblage sur stdout
//!   --diagnostics-json: diagnostics en JSON sur stdout
//!   --time            : chrono

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use gmscript_compiler::{CompilerOptions, ReceiverPolicy};
use gmscript_tools::prelude::*;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Receiver {
    CurrentThis,
    MemberOnly,
}

impl From<Receiver> for ReceiverPolicy {
    fn from(r: Receiver) -> Self {
        match r {
            Receiver::CurrentThis => Self::CurrentThis,
            Receiver::MemberOnly => Self::MemberOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gms-compile", version, about = "Compilateur gmscript (arbre JSON -> .gmf)")]
struct Cli {
    /// Arbre JSON de l'unité (ou '-' pour stdin)
    input: String,

    /// Fichier de sortie (défaut : <input>.gmf)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Informations de débogage
    #[arg(long)]
    debug: bool,

    /// Texte source à enregistrer (mode debug)
    #[arg(long, requires = "debug")]
    source: Option<PathBuf>,

    /// Politique de receveur des appels
    #[arg(long, value_enum, default_value_t = Receiver::CurrentThis)]
    receiver: Receiver,

    /// Nom de la fonction racine
    #[arg(long, default_value = "__main")]
    root_name: String,

    /// Warnings traités comme erreurs
    #[arg(long)]
    deny_warnings: bool,

    /// Affiche le désassemblage sur stdout
    #[arg(long)]
    disasm: bool,

    /// Diagnostics en JSON sur stdout
    #[arg(long)]
    diagnostics_json: bool,

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
    let timer = Timer::start();

    let (json, name) = if cli.input == "-" {
        (read_stdin_to_string()?, Utf8PathBuf::from(&cli.stdin_name))
    } else {
        let p = Utf8PathBuf::from(&cli.input);
        (read_text(&p)?, p)
    };
    let unit = parse_unit(&json).with_context(|| format!("lecture de {name}"))?;

    let source = match &cli.source {
        Some(p) => {
            let p = to_utf8(p.clone())?;
            let text = read_text(&p)?;
            let file = p.file_name().unwrap_or("unknown").to_owned();
            Some((file, text))
        }
        None => None,
    };

    let options = CompilerOptions {
        debug: cli.debug,
        receiver: cli.receiver.into(),
        root_name: cli.root_name.clone(),
        deny_warnings: cli.deny_warnings,
    };
    let out = compile_unit(&unit, options, source.as_ref().map(|(n, t)| (n.as_str(), t.as_str())));

    if cli.diagnostics_json {
        println!("{}", serde_json::to_string_pretty(&out.diagnostics)?);
    } else {
        for d in &out.diagnostics {
            eprintln!("{name}: {d}");
        }
    }

    let Some(image) = out.image else {
        return Err(anyhow!("{name}: {} diagnostic(s), aucune sortie", out.diagnostics.len()));
    };

    let dest = match &cli.out {
        Some(p) => to_utf8(p.clone())?,
        None => default_out_path(&name, "gmf"),
    };
    write_bytes(&dest, &image.to_bytes())?;
    log::info!("{} function(s) → {dest}", image.functions.len());

    if cli.disasm {
        print!("{}", image.disassemble()?);
    }
    if cli.time {
        eprintln!("{}", timer.pretty());
    }
    Ok(())
}
