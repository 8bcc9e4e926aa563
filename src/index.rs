//! Version index and manifest builder.
//!
//! `versions_index.json` is the mutable working catalogue the pipeline edits;
//! `manifest.json` is the read-only artifact it publishes from that index.
//! Both are replaced via temp-file-and-rename so the server never observes a
//! partially written file.
//!
//! Ordering invariant: sorting entries by version string ascending must equal
//! chronological publish order, which holds for the fixed-width `vYYMMDD`
//! scheme the pipeline generates.

use anyhow::Result;
use std::path::Path;

use crate::config::PolicyConfig;
use crate::models::{Manifest, VersionEntry, VersionsIndex};
use crate::store::{read_json, utc_now_iso, write_json_atomic};

pub const INDEX_FILE: &str = "versions_index.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Load the working index, or start an empty one if it does not exist yet.
pub fn load_versions_index(data_root: &Path, dataset: &str) -> Result<VersionsIndex> {
    let path = data_root.join(INDEX_FILE);
    if path.exists() {
        read_json(&path)
    } else {
        Ok(VersionsIndex::empty(dataset))
    }
}

/// Persist the working index atomically.
pub fn write_versions_index(data_root: &Path, index: &VersionsIndex) -> Result<()> {
    write_json_atomic(&data_root.join(INDEX_FILE), index)
}

/// Insert an entry, replacing any existing entry for the same version, and
/// re-sort by version string. Replacement is what lets a single day's
/// version be rebuilt in place.
pub fn upsert_version_entry(index: &mut VersionsIndex, entry: VersionEntry) {
    index.versions.retain(|row| row.version != entry.version);
    index.versions.push(entry);
    index.versions.sort_by(|a, b| a.version.cmp(&b.version));
}

/// Build the publishable manifest from the index. Requires at least one
/// version; policy constants are injected, never computed.
pub fn build_manifest(index: &VersionsIndex, policy: &PolicyConfig) -> Result<Manifest> {
    let mut versions = index.versions.clone();
    versions.sort_by(|a, b| a.version.cmp(&b.version));

    let latest = versions
        .last()
        .ok_or_else(|| anyhow::anyhow!("Cannot build manifest without at least one version entry"))?
        .clone();

    Ok(Manifest {
        dataset: index.dataset.clone(),
        latest_version: latest.version,
        latest_snapshot: latest.snapshot_path,
        latest_hash: latest.snapshot_hash,
        sync_policy: policy.to_sync_policy(),
        versions,
        compacted_patches: index.compacted_patches.clone(),
        generated_at: utc_now_iso(),
    })
}

/// Atomically replace the published `manifest.json`. All referenced patch
/// and snapshot files must already be on disk when this is called.
pub fn publish_manifest(data_root: &Path, manifest: &Manifest) -> Result<()> {
    write_json_atomic(&data_root.join(MANIFEST_FILE), manifest)
}
