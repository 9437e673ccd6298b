//! Reconciliation CLI.
//!
//! Usage: `reconcile <database.db> [--execute]`
//!
//! Without `--execute` the run is a dry run: the full plan is computed
//! and summarized but nothing is written. Pass `--execute` to apply it.

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use retina_reconcile_core::db::Database;
use retina_reconcile_core::engine::ReconcileEngine;
use retina_reconcile_core::models::RunMode;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut db_path: Option<String> = None;
    let mut mode = RunMode::DryRun;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--execute" => mode = RunMode::Execute,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown flag: {other}"),
            other => {
                if db_path.replace(other.to_string()).is_some() {
                    bail!("expected a single database path");
                }
            }
        }
    }
    let db_path = match db_path.or_else(|| std::env::var("RECONCILE_DB").ok()) {
        Some(path) => path,
        None => {
            print_usage();
            bail!("no database path given (argument or RECONCILE_DB)");
        }
    };

    if !mode.is_execute() {
        eprintln!("Dry run - no changes will be applied. Pass --execute to apply.");
    }

    let db = Database::open(&db_path).with_context(|| format!("opening database {db_path}"))?;
    let engine = ReconcileEngine::new(&db);
    let report = engine.run(mode).context("reconciliation run failed")?;

    println!("{report}");

    if report.failure.is_some() {
        bail!("run stopped before completion; see summary above");
    }
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: reconcile <database.db> [--execute]");
    eprintln!();
    eprintln!("  --execute   apply the plan (default is a dry run)");
    eprintln!();
    eprintln!("The database path may also come from RECONCILE_DB.");
}
