//! Patch graph builder: regenerates every patch artifact for the index.
//!
//! The whole incremental chain is rebuilt from scratch on each pipeline run,
//! trading recomputation cost for immunity to partial-write corruption. A
//! missing referenced snapshot aborts the run; a half-built patch graph must
//! never reach the manifest.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PolicyConfig;
use crate::diff::{build_compacted_patch, build_incremental_patch};
use crate::models::VersionsIndex;

/// Counts reported after a full rebuild.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchGraphStats {
    pub incrementals: usize,
    pub compacted: usize,
}

/// Rebuild all incremental patches and the compacted-patch window.
///
/// Step 1 regenerates one incremental patch per adjacent version pair and
/// replaces each entry's patch metadata. Step 2 replaces the compacted list
/// with one direct patch to the latest version from each version in the
/// trailing `compacted_retention_days + 1` window (the latest itself is
/// never a "from" candidate). Versions older than the window lose their
/// compacted shortcut; clients that far behind take the full strategy.
pub fn rebuild_patch_artifacts(
    index: &mut VersionsIndex,
    data_root: &Path,
    policy: &PolicyConfig,
) -> Result<PatchGraphStats> {
    index
        .versions
        .sort_by(|a, b| a.version.cmp(&b.version));

    if index.versions.is_empty() {
        index.compacted_patches.clear();
        return Ok(PatchGraphStats {
            incrementals: 0,
            compacted: 0,
        });
    }

    for entry in &mut index.versions {
        entry.patch_from_previous = None;
        entry.patch_hash = None;
    }

    let mut incrementals = 0;
    for i in 1..index.versions.len() {
        let (previous, current) = {
            let (left, right) = index.versions.split_at_mut(i);
            (&left[i - 1], &mut right[0])
        };
        let patch = build_incremental_patch(
            data_root,
            &previous.version,
            &current.version,
            &previous.snapshot_path,
            &current.snapshot_path,
        )
        .with_context(|| {
            format!(
                "Failed to rebuild incremental patch {} -> {}",
                previous.version, current.version
            )
        })?;
        current.patch_from_previous = Some(patch.path);
        current.patch_hash = Some(patch.patch_hash);
        incrementals += 1;
    }

    let latest = index
        .versions
        .last()
        .expect("versions checked non-empty above")
        .clone();

    let window_start = index
        .versions
        .len()
        .saturating_sub(policy.compacted_retention_days + 1);
    let candidates = &index.versions[window_start..index.versions.len() - 1];

    let mut compacted = Vec::with_capacity(candidates.len());
    for entry in candidates {
        let built = build_compacted_patch(
            data_root,
            &entry.version,
            &latest.version,
            &entry.snapshot_path,
            &latest.snapshot_path,
        )
        .with_context(|| {
            format!(
                "Failed to rebuild compacted patch {} -> {}",
                entry.version, latest.version
            )
        })?;
        compacted.push(built);
    }

    let count = compacted.len();
    index.compacted_patches = compacted;

    Ok(PatchGraphStats {
        incrementals,
        compacted: count,
    })
}
