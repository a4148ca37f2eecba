use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use log::{error, info};

mod extract;
mod playback;
mod speech;
mod state;
mod util;
mod voices;

use state::{ReaderOptions, ReaderState};

/// Reads a PDF or plain-text document aloud with transport controls and a
/// printed transcript for low-vision use.
#[derive(Debug, Parser)]
#[command(name = "voxlegere", version, about)]
struct Cli {
    /// Document to open at startup (PDF or plain text).
    document: Option<PathBuf>,

    /// Narration locale used to pick a voice model.
    #[arg(long, env = "VOXLEGERE_LANG", default_value = speech::DEFAULT_LANG)]
    lang: String,

    /// Speaking rate multiplier; 1.0 is the voice's natural pace.
    #[arg(long, env = "VOXLEGERE_RATE", default_value_t = speech::DEFAULT_RATE)]
    rate: f32,

    /// Directory scanned for Piper voice models.
    #[arg(long, env = "VOXLEGERE_VOICES_DIR", default_value = "assets/voices")]
    voices_dir: PathBuf,

    /// Directory for synthesized audio files.
    #[arg(long, env = "VOXLEGERE_OUTPUT_DIR", default_value = "runtime/output")]
    output_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(err) = util::logging::init() {
        eprintln!("Failed to initialise logger: {err}");
    }
    info!("Starting VoxLegere");

    let options = ReaderOptions {
        lang: cli.lang,
        rate: cli.rate,
        voices_dir: cli.voices_dir,
        output_dir: cli.output_dir,
    };
    let mut reader = ReaderState::initialise(&options).context("could not start the reader")?;

    if let Some(document) = &cli.document {
        open_document(&reader, document);
    }

    print_help();
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read command")?;
        match line.trim() {
            "" => {}
            "t" => reader.controller().toggle(),
            "s" => reader.controller().stop(),
            "?" => {
                let status = reader.controller().status();
                println!("{}", if status.speaking { "lendo" } else { "parado" });
            }
            "q" => break,
            other => {
                if let Some(path) = other.strip_prefix("o ") {
                    open_document(&reader, Path::new(path.trim()));
                } else {
                    print_help();
                }
            }
        }
    }

    reader.shutdown();
    Ok(())
}

fn open_document(reader: &ReaderState, path: &Path) {
    match reader.open(path) {
        Ok(Some(text)) => {
            println!("--- Conteúdo do Documento ---");
            println!("{text}");
            println!("-----------------------------");
        }
        Ok(None) => {}
        Err(err) => {
            error!("failed to open {}: {err}", path.display());
            println!("Erro ao processar o arquivo. Por favor, tente outro.");
        }
    }
}

fn print_help() {
    println!("Comandos: t = pausar/retomar, s = parar, o <arquivo> = abrir, ? = estado, q = sair");
}
