//! `firmware-builder` — shells out to `cargo build` for `cnc-mcu-firmware`
//! with the right target triple and feature set for a given board, and
//! reports the resulting artifact's location.
//!
//! This crate never links against `cnc-mcu-firmware` directly (it's
//! `no_std` and targets a different platform); it drives a subprocess and
//! reports what it did.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

/// Supported MCU boards, mapped to the feature flag and target triple
/// `cnc-mcu-firmware` expects for each.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Board {
    Stm32f407,
}

impl Board {
    fn target_triple(self) -> &'static str {
        match self {
            Board::Stm32f407 => "thumbv7em-none-eabihf",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Board::Stm32f407 => write!(f, "stm32f407"),
        }
    }
}

/// Which scheduler entry point to build: the `embassy` async executor or
/// the `rtic` hard-realtime dispatcher. Both live in `cnc-mcu-firmware` and
/// are feature-gated so only one is ever linked into a given image.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Executor {
    Embassy,
    Rtic,
}

impl Executor {
    fn cargo_feature(self) -> &'static str {
        match self {
            Executor::Embassy => "embassy-rt",
            Executor::Rtic => "rtic-rt",
        }
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::Embassy => write!(f, "embassy"),
            Executor::Rtic => write!(f, "rtic"),
        }
    }
}

/// Builds the CNC controller MCU firmware for a specific board.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Target board.
    #[arg(long, value_enum, default_value_t = Board::Stm32f407)]
    board: Board,

    /// Scheduler entry point to link.
    #[arg(long, value_enum, default_value_t = Executor::Embassy)]
    executor: Executor,

    /// Build in release mode.
    #[arg(long)]
    release: bool,

    /// Workspace root to run `cargo build` from. Defaults to the current
    /// directory, which is correct when invoked via `cargo run -p
    /// firmware-builder`.
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let workspace_root = cli.workspace_root.unwrap_or_else(|| PathBuf::from("."));

    let mut args = vec![
        "build".to_string(),
        "--package".to_string(),
        "cnc-mcu-firmware".to_string(),
        "--target".to_string(),
        cli.board.target_triple().to_string(),
        "--no-default-features".to_string(),
        "--features".to_string(),
        format!("{},defmt-logging", cli.executor.cargo_feature()),
    ];
    if cli.release {
        args.push("--release".to_string());
    }

    info!(board = %cli.board, executor = %cli.executor, release = cli.release, "building firmware image");
    let status = Command::new("cargo")
        .args(&args)
        .current_dir(&workspace_root)
        .status()
        .context("failed to spawn cargo")?;

    if !status.success() {
        bail!("cargo build exited with {status}");
    }

    let profile_dir = if cli.release { "release" } else { "debug" };
    let artifact = workspace_root
        .join("target")
        .join(cli.board.target_triple())
        .join(profile_dir)
        .join("cnc-mcu-firmware");

    if artifact.exists() {
        info!(path = %artifact.display(), "firmware image ready");
    } else {
        warn!(path = %artifact.display(), "cargo reported success but the expected artifact is missing");
    }

    Ok(())
}
