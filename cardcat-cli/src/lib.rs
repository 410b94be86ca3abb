//! Commands of the `cardcat` binary.
//!
//! Every command maps a volume over a local directory using the in-memory
//! log, imports the directory, and reports on the result.

use anyhow::{Context, Result};
use cardcat_volume::{ImportOutcome, Manifest, MemoryBackend, Volume, VolumeConfig};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cardcat")]
#[command(about = "Import and inspect library volumes")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Import a directory, write its manifest and print events as JSON lines
    Import {
        dir: PathBuf,

        /// Volume name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,

        /// Extra manifest field, as key=value
        #[arg(long = "set", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// List the files of a directory's volume
    Ls {
        dir: PathBuf,

        /// Only list entries at or below this path
        #[arg(long, default_value = "/")]
        below: String,
    },

    /// Print the stats of a directory's volume as JSON
    Stats { dir: PathBuf },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

/// Runs `command`, writing its report to `out`.
pub async fn execute(command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Import { dir, name, fields } => import(&dir, name, fields, out).await,
        Command::Ls { dir, below } => list(&dir, &below, out).await,
        Command::Stats { dir } => stats(&dir, out).await,
    }
}

async fn open(dir: &Path, name: Option<String>) -> Result<Volume> {
    let name = name.unwrap_or_else(|| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let backend = MemoryBackend::new();
    Volume::create(VolumeConfig::new(dir, name), &backend)
        .await
        .with_context(|| format!("opening volume at {}", dir.display()))
}

async fn import(
    dir: &Path,
    name: Option<String>,
    fields: Vec<(String, String)>,
    out: &mut impl Write,
) -> Result<()> {
    let volume = open(dir, name).await?;
    let mut events = volume.subscribe();

    let outcome = {
        let import = volume.import_files(dir);
        tokio::pin!(import);
        loop {
            tokio::select! {
                outcome = &mut import => break outcome,
                event = events.recv() => match event {
                    Ok(event) => writeln!(out, "{}", serde_json::to_string(&event)?)?,
                    Err(RecvError::Lagged(missed)) => warn!("Missed {} events", missed),
                    Err(RecvError::Closed) => {}
                },
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
    }
    let outcome = outcome.with_context(|| format!("importing {}", dir.display()))?;
    if let ImportOutcome::Completed { puts, deletes } = outcome {
        info!("Imported {} files, removed {}", puts, deletes);
    }

    let overrides = fields
        .into_iter()
        .fold(Manifest::new(), |doc, (key, value)| doc.with(key, value));
    let manifest = volume
        .write_manifest(overrides)
        .await
        .context("writing manifest")?;
    info!("Volume {} ready ({})", volume.key(), manifest.url().unwrap_or_default());

    volume.close().await.context("closing volume")?;
    Ok(())
}

async fn list(dir: &Path, below: &str, out: &mut impl Write) -> Result<()> {
    let volume = open(dir, None).await?;
    volume
        .import_files(dir)
        .await
        .with_context(|| format!("importing {}", dir.display()))?;

    for entry in volume.list_contents(below).await? {
        let size = entry.stat.map_or(0, |s| s.size);
        writeln!(out, "{}\t{}", size, entry.path)?;
    }
    volume.close().await.context("closing volume")?;
    Ok(())
}

async fn stats(dir: &Path, out: &mut impl Write) -> Result<()> {
    let volume = open(dir, None).await?;
    volume
        .import_files(dir)
        .await
        .with_context(|| format!("importing {}", dir.display()))?;
    for entry in volume.list_contents("/").await? {
        volume.record_path_format(&entry.path);
    }

    let report = json!({
        "handle": volume.handle(),
        "stats": volume.more_stats().await,
        "metadata": volume.metadata_progress(),
        "format": volume.format(),
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    volume.close().await.context("closing volume")?;
    Ok(())
}
