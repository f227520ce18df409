//! gridsync - formula evaluation and recalculation from the command line

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use directories::ProjectDirs;
use log::debug;
use serde_json::json;

use gridsync_core::storage::grd;
use gridsync_core::{CellResult, CoreError, MemoryStore, RecalcConfig, Recalculator, SheetId};
use gridsync_engine::builtins::BUILTINS;
use gridsync_engine::{Coordinate, format_number};

/// Evaluate formulas and apply cell writes against an in-memory sheet.
///
/// Writes (`-s`) run first, in order; previews (`-c`) then see their results.
#[derive(Parser, Debug)]
#[command(name = "gridsync", version)]
struct Cli {
    /// Recalculation limits (TOML). Defaults to <config dir>/gridsync/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seed the sheet from a .grd file
    #[arg(short, long, value_name = "SEED.grd")]
    file: Option<PathBuf>,

    /// Sheet id used for seeding, writes and previews
    #[arg(long, default_value_t = 1)]
    sheet: i64,

    /// Evaluate a formula without storing it (repeatable)
    #[arg(short = 'c', long = "command", value_name = "FORMULA")]
    commands: Vec<String>,

    /// Write a cell, e.g. `B1==A1+10` or `A1=5` (repeatable)
    #[arg(short = 's', long = "set", value_name = "CELL=INPUT")]
    sets: Vec<String>,

    /// Print results as JSON, one document per line
    #[arg(long)]
    json: bool,

    /// List built-in functions and exit
    #[arg(long)]
    list_functions: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_functions {
        for builtin in BUILTINS {
            println!("{:<28} {}", builtin.signature, builtin.description);
        }
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Returns whether every preview and write succeeded.
#[tokio::main(flavor = "current_thread")]
async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;
    let sheet = SheetId(cli.sheet);
    let store = Arc::new(MemoryStore::new());
    let recalc = Recalculator::new(Arc::clone(&store), config);

    if let Some(path) = &cli.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let count = grd::seed(&store, sheet, &content)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let tracked = recalc.rebuild_sheet(sheet).await?;
        debug!("seeded {} cells ({} formulas) into {}", count, tracked, sheet);
    }

    let mut all_ok = true;

    for set in &cli.sets {
        let (at, input) = parse_assignment(set)?;
        let results = recalc.write_input(sheet, at, input).await?;
        all_ok &= results.iter().all(CellResult::is_ok);
        print_batch(&results, cli.json)?;
    }

    for formula in &cli.commands {
        match recalc.evaluate_formula(sheet, formula).await {
            Ok(value) if cli.json => println!("{}", json!({ "formula": formula, "value": value })),
            Ok(value) => println!("{}", format_number(value)),
            Err(CoreError::Engine(err)) => {
                all_ok = false;
                if cli.json {
                    println!("{}", json!({ "formula": formula, "error": err.report() }));
                } else {
                    println!("{} {}", err.token(), err);
                }
            }
            Err(other) => return Err(other.into()),
        }
    }

    Ok(all_ok)
}

fn load_config(explicit: Option<&Path>) -> Result<RecalcConfig> {
    if let Some(path) = explicit {
        return Ok(RecalcConfig::load(path)?);
    }
    match user_config_path() {
        Some(path) if path.exists() => Ok(RecalcConfig::load(&path)?),
        _ => Ok(RecalcConfig::default()),
    }
}

fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridsync")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

/// Split `CELL=INPUT` at the first `=`.
fn parse_assignment(arg: &str) -> Result<(Coordinate, &str)> {
    let (cell, input) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected CELL=INPUT, got '{}'", arg))?;
    let at = cell.parse::<Coordinate>().map_err(|e| anyhow!(e))?;
    Ok((at, input))
}

fn print_batch(results: &[CellResult], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(results)?);
        return Ok(());
    }
    for result in results {
        println!("{} = {}", result.coordinate, result.display());
        if let Err(err) = &result.outcome {
            eprintln!("{}: {}", result.coordinate, err);
        }
    }
    Ok(())
}
