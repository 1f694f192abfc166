//! hottubctl - read-mostly companion tool for inspecting and cleaning up
//! hottub pool slot directories.
//!
//! Never participates in the pool protocol itself (C9, ambient). The
//! filesystem under `data_root` remains the only authoritative record of
//! slot state (spec §9); this tool only scans it.

use clap::{Parser, Subcommand};
use hottub::paths;
use hottub::process::is_alive;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hottubctl")]
#[command(about = "Inspect and clean up hottub pool slots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every on-disk pool slot.
    Ls {
        /// Emit machine-readable JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Remove slot directories whose server is no longer alive and which
    /// have no attached client.
    Gc {
        /// Only consider slots whose stdout/stderr haven't been touched in
        /// this long. Defaults to removing any dead-server slot regardless
        /// of age.
        #[arg(long)]
        stale_after: Option<humantime::Duration>,

        /// Remove without asking for confirmation.
        #[arg(long)]
        force: bool,
    },

    /// Show the state of every slot for one pool identity prefix.
    Status {
        /// The 32-character hex digest identifying the pool.
        id_prefix: String,
    },
}

#[derive(Debug, Serialize)]
struct SlotRow {
    dir_name: String,
    server_pid: Option<i32>,
    server_alive: bool,
    client_attached: bool,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ls { json } => run_ls(json),
        Commands::Gc { stale_after, force } => run_gc(stale_after.map(Into::into), force),
        Commands::Status { id_prefix } => run_status(&id_prefix),
    };

    if let Err(e) = result {
        eprintln!("hottubctl: {}", e);
        std::process::exit(1);
    }
}

fn run_ls(json: bool) -> hottub::error::Result<()> {
    let rows = scan_slots()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows).unwrap());
        return Ok(());
    }

    if rows.is_empty() {
        println!("No pool slots found");
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<8} {:<8}",
        "SLOT", "SERVER_PID", "ALIVE", "CLIENT"
    );
    for row in rows {
        println!(
            "{:<36} {:<10} {:<8} {:<8}",
            row.dir_name,
            row.server_pid.map(|p| p.to_string()).unwrap_or_default(),
            row.server_alive,
            row.client_attached,
        );
    }
    Ok(())
}

fn run_gc(stale_after: Option<Duration>, force: bool) -> hottub::error::Result<()> {
    let root = paths::data_root()?;
    let rows = scan_slots()?;
    let mut removed = 0;

    for row in rows {
        if row.server_alive || row.client_attached {
            continue;
        }

        let slot_path = root.join(&row.dir_name);
        if let Some(min_age) = stale_after {
            if !is_stale(&slot_path, min_age) {
                continue;
            }
        }

        if !force {
            println!("would remove {} (dry run, pass --force)", row.dir_name);
            continue;
        }

        match fs::remove_dir_all(&slot_path) {
            Ok(()) => {
                println!("removed {}", row.dir_name);
                removed += 1;
            }
            Err(e) => tracing::warn!(slot = %row.dir_name, error = %e, "failed to remove stale slot"),
        }
    }

    if force {
        println!("removed {} stale slot(s)", removed);
    }
    Ok(())
}

fn run_status(id_prefix: &str) -> hottub::error::Result<()> {
    let root = paths::data_root()?;
    let mut found = false;

    for entry in fs::read_dir(&root).map_err(hottub::error::Error::SelfPath)? {
        let entry = entry.map_err(hottub::error::Error::SelfPath)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains(id_prefix) {
            continue;
        }
        found = true;
        let row = inspect_slot(&entry.path(), &name);
        println!(
            "{}: server_pid={:?} alive={} client_attached={}",
            row.dir_name, row.server_pid, row.server_alive, row.client_attached
        );
    }

    if !found {
        println!("no slots found for prefix {}", id_prefix);
    }
    Ok(())
}

fn scan_slots() -> hottub::error::Result<Vec<SlotRow>> {
    let root = paths::data_root()?;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for entry in fs::read_dir(&root).map_err(hottub::error::Error::SelfPath)? {
        let entry = entry.map_err(hottub::error::Error::SelfPath)?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        rows.push(inspect_slot(&entry.path(), &name));
    }
    Ok(rows)
}

fn inspect_slot(slot_path: &Path, dir_name: &str) -> SlotRow {
    let server_pid = fs::read_to_string(slot_path.join("server.pid"))
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());
    let server_alive = server_pid.map(is_alive).unwrap_or(false);
    let client_attached = slot_path.join("client.pid").exists();

    SlotRow {
        dir_name: dir_name.to_string(),
        server_pid,
        server_alive,
        client_attached,
    }
}

fn is_stale(slot_path: &Path, min_age: Duration) -> bool {
    let check: PathBuf = slot_path.join("stderr");
    fs::metadata(&check)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age >= min_age)
        .unwrap_or(true)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hottub=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
