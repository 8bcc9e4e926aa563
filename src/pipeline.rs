//! Pipeline command orchestration.
//!
//! One function per batch subcommand. The pipeline is a single-runner batch
//! job: it writes every snapshot and patch artifact first and only then
//! replaces `versions_index.json` and `manifest.json`, so a crash mid-run
//! leaves the previously published manifest untouched. Any failure aborts
//! the whole run; nothing here retries.
//!
//! Each command prints a compact JSON summary on stdout for scripting.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::diff::{build_compacted_patch, build_incremental_patch};
use crate::graph::rebuild_patch_artifacts;
use crate::index::{
    build_manifest, load_versions_index, publish_manifest, upsert_version_entry,
    write_versions_index, MANIFEST_FILE,
};
use crate::store::{ingest, load_source_records, version_for_today};

const DEFAULT_SOURCE_REL: &str = "incoming/default-cards.json.gz";

/// Ingest one source file, rebuild the whole patch graph and publish a new
/// manifest. The everything command for the daily scheduled run.
pub async fn run_build_daily(
    config: &Config,
    source_file: Option<PathBuf>,
    source_url: Option<String>,
    version: Option<String>,
) -> Result<()> {
    let data_root = &config.data.root;
    std::fs::create_dir_all(data_root)
        .with_context(|| format!("Failed to create {}", data_root.display()))?;

    let source_file = source_file.unwrap_or_else(|| data_root.join(DEFAULT_SOURCE_REL));
    if let Some(url) = source_url {
        download_source(&url, &source_file).await?;
    }
    if !source_file.exists() {
        anyhow::bail!("Source file not found: {}", source_file.display());
    }

    let version = version.unwrap_or_else(version_for_today);

    let mut index = load_versions_index(data_root, &config.data.dataset)?;

    let records = load_source_records(&source_file)?;
    let entry = ingest(records, data_root, &version)?;
    let row_count = entry.row_count;
    let snapshot_hash = entry.snapshot_hash.clone();
    upsert_version_entry(&mut index, entry);

    let stats = rebuild_patch_artifacts(&mut index, data_root, &config.policy)?;
    write_versions_index(data_root, &index)?;

    let manifest = build_manifest(&index, &config.policy)?;
    publish_manifest(data_root, &manifest)?;

    println!(
        "{}",
        serde_json::json!({
            "dataset": manifest.dataset,
            "version": version,
            "rows": row_count,
            "snapshotHash": snapshot_hash,
            "incrementalPatches": stats.incrementals,
            "compactedPatches": stats.compacted,
            "manifestPath": data_root.join(MANIFEST_FILE).display().to_string(),
        })
    );
    Ok(())
}

/// Normalize one source file into a snapshot only, with no index update.
pub fn run_ingest(source_file: &Path, out_dir: &Path, version: Option<String>) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    if !source_file.exists() {
        anyhow::bail!("Source file not found: {}", source_file.display());
    }

    let version = version.unwrap_or_else(version_for_today);
    let records = load_source_records(source_file)?;
    let entry = ingest(records, out_dir, &version)?;

    println!("{}", serde_json::to_string(&entry)?);
    Ok(())
}

/// Ad hoc incremental patch between two named snapshots.
pub fn run_diff(
    config: &Config,
    from_version: &str,
    to_version: &str,
    from_snapshot: &str,
    to_snapshot: &str,
) -> Result<()> {
    let summary = build_incremental_patch(
        &config.data.root,
        from_version,
        to_version,
        from_snapshot,
        to_snapshot,
    )?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Ad hoc compacted patch between two named snapshots.
pub fn run_compact(
    config: &Config,
    from_version: &str,
    to_version: &str,
    from_snapshot: &str,
    to_snapshot: &str,
) -> Result<()> {
    let entry = build_compacted_patch(
        &config.data.root,
        from_version,
        to_version,
        from_snapshot,
        to_snapshot,
    )?;
    println!("{}", serde_json::to_string(&entry)?);
    Ok(())
}

/// Rebuild `manifest.json` from the existing index without re-ingesting.
pub fn run_manifest(config: &Config) -> Result<()> {
    let data_root = &config.data.root;
    let index = load_versions_index(data_root, &config.data.dataset)?;
    let manifest = build_manifest(&index, &config.policy)?;
    publish_manifest(data_root, &manifest)?;

    println!(
        "{}",
        serde_json::json!({
            "manifestPath": data_root.join(MANIFEST_FILE).display().to_string(),
            "latestVersion": manifest.latest_version,
        })
    );
    Ok(())
}

/// Fetch the upstream bulk file to the incoming path before ingesting.
async fn download_source(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    tracing::info!(url, dest = %dest.display(), "downloading source file");
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("Upstream returned an error status for {url}"))?;
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read response body from {url}"))?;

    std::fs::write(dest, &bytes)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}
