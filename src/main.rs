use std::{fs, path::PathBuf, process};

use anyhow::Context;
use clap::Parser;

use costume_sync::{
    log_info,
    settings::{SyncSettings, load_settings},
    sync::{SyncOptions, sync_costume_files},
};

/// Propagate avatar bone scales and shape-key weights onto attached costumes.
#[derive(Debug, Parser)]
#[command(name = "costume-sync", version)]
struct Cli {
    /// Reference avatar (.glb / .gltf / .vrm)
    reference: PathBuf,

    /// Document containing the costumes to adjust
    target: PathBuf,

    /// Output path for the adjusted target
    #[arg(short, long)]
    output: PathBuf,

    /// Authored avatar whose armature defines the legitimate bone paths
    #[arg(long)]
    authored: Option<PathBuf>,

    /// Costume node name to adjust (repeatable); auto-detected when omitted
    #[arg(long = "costume")]
    costumes: Vec<String>,

    /// JSON settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the reconciliation report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match cli.settings.as_deref() {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load sync settings: {}", path.display()))?,
        None => SyncSettings::default(),
    };
    let options = SyncOptions {
        authored_path: cli.authored,
        costume_names: cli.costumes,
        settings,
    };

    let run = sync_costume_files(&cli.reference, &cli.target, &cli.output, &options)?;
    let report = &run.report;

    for line in run.log.render() {
        println!("{}", line);
    }
    println!();
    println!("Outcome: {:?}", report.outcome);
    println!(
        "Reference armature: {}",
        report.reference_armature.as_deref().unwrap_or("-")
    );
    println!(
        "Corrections: {} (excluded {}), shape keys: {}",
        report.correction_count, report.excluded_count, report.shape_key_count
    );
    println!("Costumes: {}", run.costumes.join(", "));
    for costume in &report.costumes {
        println!(
            "  {}: applied {}, unmatched {}",
            costume.costume,
            costume.applied_count,
            costume.unmatched.len()
        );
    }
    println!("Updated nodes: {}", run.written_nodes);

    if let Some(path) = cli.report {
        let content =
            serde_json::to_string_pretty(report).context("failed to serialize report as JSON")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write report: {}", path.display()))?;
        log_info!("Report written to {}", path.display());
    }

    Ok(())
}
