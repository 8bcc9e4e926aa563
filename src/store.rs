//! Snapshot store and on-disk JSON plumbing.
//!
//! All pipeline artifacts are compact JSON files under a single data root.
//! Snapshots are immutable once written: one `versions/<v>.snapshot.json`
//! array per version, sorted by record id, hashed over the exact serialized
//! bytes so re-ingesting identical input yields an identical hash.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::models::{NormalizedRecord, VersionEntry};
use crate::normalize::normalize_snapshot;

/// Lowercase hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash the compact JSON serialization of any serializable value.
pub fn hash_json<T: Serialize>(value: &T) -> Result<String> {
    let body = serde_json::to_vec(value).context("Failed to serialize payload for hashing")?;
    Ok(hash_bytes(&body))
}

/// Current UTC time as an ISO-8601 string with second precision.
pub fn utc_now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Version id for a publish date: fixed-width `vYYMMDD`, which keeps
/// lexicographic order equal to chronological order.
pub fn version_for_date(date: NaiveDate) -> String {
    date.format("v%y%m%d").to_string()
}

/// Today's version id (UTC).
pub fn version_for_today() -> String {
    version_for_date(Utc::now().date_naive())
}

/// Read and parse a JSON file, tolerating a UTF-8 BOM.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    serde_json::from_str(content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Serialize a value compactly and write it, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).context("Failed to serialize payload")?;
    write_bytes(path, &bytes)
}

/// Like [`write_json`], but writes to a temporary sibling and renames it into
/// place so readers never observe a partially written file. Used for the
/// published `manifest.json` and `versions_index.json`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).context("Failed to serialize payload")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Load the raw upstream bulk file: a JSON array of card objects, optionally
/// gzip-compressed (`.gz` suffix).
pub fn load_source_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    let content = if is_gz {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = String::new();
        decoder
            .read_to_string(&mut buf)
            .with_context(|| format!("Failed to decompress {}", path.display()))?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    serde_json::from_str(content)
        .with_context(|| format!("Failed to parse source file {}", path.display()))
}

/// Relative snapshot path for a version.
pub fn snapshot_rel_path(version: &str) -> String {
    format!("versions/{version}.snapshot.json")
}

/// Normalize raw records into a snapshot, persist it and return its catalogue
/// entry. Idempotent: identical input and version produce an identical file
/// and hash.
pub fn ingest(
    source_records: Vec<serde_json::Value>,
    data_root: &Path,
    version: &str,
) -> Result<VersionEntry> {
    let normalized = normalize_snapshot(source_records)?;

    let snapshot_rel = snapshot_rel_path(version);
    let bytes = serde_json::to_vec(&normalized).context("Failed to serialize snapshot")?;
    write_bytes(&data_root.join(&snapshot_rel), &bytes)?;

    Ok(VersionEntry {
        version: version.to_string(),
        snapshot_path: snapshot_rel,
        snapshot_hash: hash_bytes(&bytes),
        patch_from_previous: None,
        patch_hash: None,
        row_count: normalized.len(),
        created_at: utc_now_iso(),
    })
}

/// Load a snapshot file into an id-keyed map for diffing. Rebuilt fresh on
/// every read; there is no persistent index.
pub fn load_snapshot_map(path: &Path) -> Result<BTreeMap<String, NormalizedRecord>> {
    let rows: Vec<NormalizedRecord> = read_json(path)?;
    Ok(rows.into_iter().map(|row| (row.id.clone(), row)).collect())
}
