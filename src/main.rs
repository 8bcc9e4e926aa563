//! # cardsync CLI
//!
//! The `cardsync` binary drives both halves of the system: the scheduled
//! batch pipeline that publishes snapshots, patches and the manifest, and
//! the HTTP sync API that serves them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cardsync build-daily` | Ingest one source file and rebuild index/patches/manifest |
//! | `cardsync ingest` | Normalize one source file into a snapshot only |
//! | `cardsync diff` | Generate one ad hoc incremental patch |
//! | `cardsync compact` | Generate one ad hoc compacted patch |
//! | `cardsync manifest` | Rebuild `manifest.json` from the existing index |
//! | `cardsync serve` | Start the sync API server |
//!
//! ## Examples
//!
//! ```bash
//! # Daily scheduled run: download, ingest today's version, publish
//! cardsync --config ./config/cardsync.toml build-daily \
//!     --source-url https://bulk.example/default-cards.json.gz
//!
//! # Rebuild the manifest without re-ingesting
//! cardsync manifest
//!
//! # Serve the sync API
//! cardsync serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cardsync::{config, pipeline, server};

/// cardsync — versioned snapshot and patch distribution for card price
/// datasets.
///
/// All commands except `ingest` read a TOML configuration file naming the
/// data root, dataset, sync policy and server settings.
#[derive(Parser)]
#[command(
    name = "cardsync",
    about = "Versioned snapshot and patch distribution for card price datasets",
    version,
    long_about = "cardsync ingests a periodically refreshed bulk card dataset into immutable \
    versioned snapshots, derives incremental and compacted diff patches, publishes a manifest, \
    and serves a rate-limited sync API that picks the cheapest catch-up strategy per client."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cardsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest one source file and rebuild index, patches and manifest.
    ///
    /// The everything command for the daily scheduled run: normalizes the
    /// source into a new snapshot version, regenerates the full incremental
    /// patch chain and the compacted-patch window, then atomically publishes
    /// a fresh manifest. Aborts without touching the published manifest if
    /// any step fails.
    BuildDaily {
        /// Source bulk file (JSON array, optionally .gz). Defaults to
        /// `<data root>/incoming/default-cards.json.gz`.
        #[arg(long)]
        source_file: Option<PathBuf>,

        /// Download the bulk file from this URL to the source path first.
        #[arg(long)]
        source_url: Option<String>,

        /// Version id to assign. Defaults to today's `vYYMMDD` (UTC).
        #[arg(long)]
        version: Option<String>,
    },

    /// Normalize one source file into a snapshot only (no index update).
    Ingest {
        /// Source bulk file (JSON array, optionally .gz).
        #[arg(long)]
        source_file: PathBuf,

        /// Directory to write the snapshot under.
        #[arg(long)]
        out_dir: PathBuf,

        /// Version id to assign. Defaults to today's `vYYMMDD` (UTC).
        #[arg(long)]
        version: Option<String>,
    },

    /// Generate one incremental patch between two named snapshots.
    Diff {
        #[arg(long)]
        from_version: String,
        #[arg(long)]
        to_version: String,
        /// Old snapshot path, relative to the data root.
        #[arg(long)]
        from_snapshot: String,
        /// New snapshot path, relative to the data root.
        #[arg(long)]
        to_snapshot: String,
    },

    /// Generate one compacted patch between two named snapshots.
    Compact {
        #[arg(long)]
        from_version: String,
        #[arg(long)]
        to_version: String,
        /// Old snapshot path, relative to the data root.
        #[arg(long)]
        from_snapshot: String,
        /// New snapshot path, relative to the data root.
        #[arg(long)]
        to_snapshot: String,
    },

    /// Rebuild `manifest.json` from `versions_index.json` without
    /// re-ingesting.
    Manifest,

    /// Start the sync API server.
    ///
    /// Binds to `[server].bind` and serves `/health`, `/metrics`,
    /// `/sync/status`, `/sync/patch` and `/sync/snapshot` over the data
    /// root's published manifest.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs on stderr; stdout is reserved for the commands' JSON summaries.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Ingest writes to an explicit output directory and needs no config.
    if let Commands::Ingest {
        source_file,
        out_dir,
        version,
    } = &cli.command
    {
        return pipeline::run_ingest(source_file, out_dir, version.clone());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::BuildDaily {
            source_file,
            source_url,
            version,
        } => {
            pipeline::run_build_daily(&cfg, source_file, source_url, version).await?;
        }
        Commands::Ingest { .. } => unreachable!("handled before config loading"),
        Commands::Diff {
            from_version,
            to_version,
            from_snapshot,
            to_snapshot,
        } => {
            pipeline::run_diff(&cfg, &from_version, &to_version, &from_snapshot, &to_snapshot)?;
        }
        Commands::Compact {
            from_version,
            to_version,
            from_snapshot,
            to_snapshot,
        } => {
            pipeline::run_compact(&cfg, &from_version, &to_version, &from_snapshot, &to_snapshot)?;
        }
        Commands::Manifest => {
            pipeline::run_manifest(&cfg)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
