//! Diff engine: added/updated/removed patches between two snapshots.
//!
//! Diffing works on id-keyed `BTreeMap`s, so every output list comes out in
//! ascending id order without an explicit sort — the determinism the patch
//! graph relies on to rebuild everything from scratch with stable hashes.
//! Updates are whole-record replacements, never field deltas.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{CompactedPatchEntry, NormalizedRecord, Patch, PatchBody};
use crate::store::{hash_json, load_snapshot_map, utc_now_iso, write_json};

/// Relative path for an incremental patch artifact.
pub fn patch_rel_path(to_version: &str, from_version: &str) -> String {
    format!("patches/{to_version}.from-{from_version}.patch.json")
}

/// Relative path for a compacted patch artifact.
pub fn compacted_rel_path(to_version: &str, from_version: &str) -> String {
    format!("compacted/{to_version}.from-{from_version}.compacted.json")
}

/// Compute added/updated/removed between two id-keyed snapshots.
///
/// `added`: ids only in `new`. `removed`: ids only in `old` (ids, no
/// payload). `updated`: ids in both whose records are not structurally equal.
pub fn diff_snapshots(
    old: &BTreeMap<String, NormalizedRecord>,
    new: &BTreeMap<String, NormalizedRecord>,
) -> (Vec<NormalizedRecord>, Vec<NormalizedRecord>, Vec<String>) {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    for (id, record) in new {
        match old.get(id) {
            None => added.push(record.clone()),
            Some(previous) if previous != record => updated.push(record.clone()),
            Some(_) => {}
        }
    }

    let removed = old
        .keys()
        .filter(|id| !new.contains_key(*id))
        .cloned()
        .collect();

    (added, updated, removed)
}

/// Build a patch between two snapshot files and attach its body hash.
///
/// Pure given identical snapshot contents: the same inputs always produce
/// the same `patchHash`.
pub fn build_patch(
    data_root: &Path,
    from_version: &str,
    to_version: &str,
    old_snapshot_rel: &str,
    new_snapshot_rel: &str,
) -> Result<Patch> {
    let old_map = load_snapshot_map(&data_root.join(old_snapshot_rel))?;
    let new_map = load_snapshot_map(&data_root.join(new_snapshot_rel))?;
    let (added, updated, removed) = diff_snapshots(&old_map, &new_map);

    let patch_hash = hash_json(&PatchBody {
        from_version,
        to_version,
        added: &added,
        updated: &updated,
        removed: &removed,
    })?;

    Ok(Patch {
        from_version: from_version.to_string(),
        to_version: to_version.to_string(),
        added,
        updated,
        removed,
        patch_hash,
    })
}

/// Summary of one persisted incremental patch, reported by the pipeline.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    pub path: String,
    pub patch_hash: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Build and persist one incremental patch between adjacent versions.
pub fn build_incremental_patch(
    data_root: &Path,
    from_version: &str,
    to_version: &str,
    old_snapshot_rel: &str,
    new_snapshot_rel: &str,
) -> Result<PatchSummary> {
    let patch = build_patch(
        data_root,
        from_version,
        to_version,
        old_snapshot_rel,
        new_snapshot_rel,
    )?;

    let patch_rel = patch_rel_path(to_version, from_version);
    write_json(&data_root.join(&patch_rel), &patch)?;

    Ok(PatchSummary {
        path: patch_rel,
        patch_hash: patch.patch_hash.clone(),
        added: patch.added.len(),
        updated: patch.updated.len(),
        removed: patch.removed.len(),
    })
}

/// Build and persist one compacted patch from a retained older version
/// straight to the latest. Same shape as an incremental patch, different
/// span and storage location.
pub fn build_compacted_patch(
    data_root: &Path,
    from_version: &str,
    to_version: &str,
    from_snapshot_rel: &str,
    latest_snapshot_rel: &str,
) -> Result<CompactedPatchEntry> {
    let patch = build_patch(
        data_root,
        from_version,
        to_version,
        from_snapshot_rel,
        latest_snapshot_rel,
    )?;

    let patch_rel = compacted_rel_path(to_version, from_version);
    write_json(&data_root.join(&patch_rel), &patch)?;

    Ok(CompactedPatchEntry {
        from_version: from_version.to_string(),
        to_version: to_version.to_string(),
        path: patch_rel,
        patch_hash: patch.patch_hash,
        created_at: utc_now_iso(),
    })
}
