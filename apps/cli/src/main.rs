//! Command-line frontend.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use emotion_core::Ps2;

/// PlayStation 2 emulator.
#[derive(Debug, Parser)]
#[command(name = "emotion", version, about)]
struct Args {
    /// Path to a 4 MiB BIOS image.
    bios: PathBuf,

    /// Optional ELF or CD-ROM image to boot.
    image: Option<PathBuf>,

    /// Stop after this many frames (run forever by default).
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Usage and version requests are not failures.
            let code = if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = err.print();
            return code;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let bios = std::fs::read(&args.bios)
        .with_context(|| format!("failed to read BIOS image `{}`", args.bios.display()))?;
    if let Some(image) = &args.image {
        info!("boot image `{}` queued (loader not yet wired)", image.display());
    }

    let mut ps2 = Ps2::with_bios(&bios);
    info!("powered on, entering the frame loop");

    let mut frames = 0;
    loop {
        ps2.frame();
        frames += 1;
        if args.frames.is_some_and(|limit| frames >= limit) {
            info!("stopping after {frames} frames");
            return Ok(());
        }
    }
}
