//! `ccint` — pilote en ligne de commande de ccint
//!
//! Le binaire ne fait que : parsing d'arguments, initialisation du
//! logger, lecture du fichier snippet, puis délégation à la session
//! (`ccint-session`) avec le front-end de référence (`ccint-minic`).

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use ccint_core::SharedContext;
use ccint_minic::MinicFrontend;
use ccint_session::Interpreter;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "ccint",
    version,
    about = "ccint — compile un snippet et l'exécute immédiatement",
    long_about = None
)]
struct Opt {
    /// Fichier snippet à compiler puis exécuter
    #[arg(value_name = "FILE", required_unless_present = "print_include_paths")]
    file: Option<PathBuf>,

    /// Enrobe les instructions dans une entrée synthétique
    #[arg(short = 'w', long = "wrap", action = ArgAction::SetTrue)]
    wrap: bool,

    /// Chemin de recherche d'includes (répétable)
    #[arg(short = 'I', value_name = "DIR", action = ArgAction::Append)]
    include: Vec<PathBuf>,

    /// Bibliothèque à précharger, statique ou dynamique selon sa
    /// signature binaire (répétable)
    #[arg(short = 'L', value_name = "LIB", action = ArgAction::Append)]
    libs: Vec<PathBuf>,

    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Affiche les chemins d'includes effectifs, un par ligne, et sort
    #[arg(long = "print-include-paths", action = ArgAction::SetTrue)]
    print_include_paths: bool,
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(level),
        )
        .format_timestamp_secs()
        .try_init();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

/// Journalise les paniques avant la mort du processus, que le logger
/// soit branché ou non.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("fatal: {info}");
    }));
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    install_panic_hook();
    if let Err(e) = real_main() {
        // L'échec est journalisé avec le préfixe `error:` ; le
        // processus sort quand même avec 0.
        eprintln!("error: {e:#}");
    }
    ExitCode::SUCCESS
}

fn real_main() -> Result<()> {
    let opt = Opt::parse();
    init_telemetry(opt.verbose, opt.quiet);

    let ctx = SharedContext::new();
    let mut session = Interpreter::new(Box::new(MinicFrontend::new(ctx)));
    session.set_wrap_input(opt.wrap);

    // Le répertoire courant d'abord, puis les -I dans l'ordre ; les
    // doublons sont absorbés par la session.
    session.add_include_path(".");
    for dir in &opt.include {
        session.add_include_path(dir.clone());
    }

    if opt.print_include_paths {
        for dir in session.include_paths() {
            println!("{}", dir.display());
        }
        return Ok(());
    }

    let Some(file) = opt.file else {
        anyhow::bail!("missing input file");
    };

    for lib in &opt.libs {
        session.add_library(lib)?;
    }

    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read `{}`", file.display()))?;
    session.set_input_name(file.display().to_string());

    log::debug!(
        "running `{}` (wrap: {}, {} include dirs, {} libraries)",
        file.display(),
        opt.wrap,
        session.include_paths().len(),
        opt.libs.len()
    );
    session.parse_and_execute(&source)?;
    Ok(())
}

// ──────────────────────────── Tests ────────────────────────────
