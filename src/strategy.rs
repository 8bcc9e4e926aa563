//! Sync strategy decision.
//!
//! A pure function over manifest state: given the client's current version,
//! pick the cheapest valid way to bring it to latest. The same function runs
//! in the live request path and in batch tooling, so it must be total —
//! any `current` string, including garbage, yields a decision.

use serde::Serialize;

use crate::models::Manifest;

/// How a client should catch up to the latest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Already current; nothing to do.
    Noop,
    /// Walk the incremental patch chain.
    Chain,
    /// Apply one long-span compacted patch.
    Compacted,
    /// Redownload the entire snapshot.
    Full,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Noop => "noop",
            Strategy::Chain => "chain",
            Strategy::Compacted => "compacted",
            Strategy::Full => "full",
        }
    }
}

/// Decide the sync strategy and missed-version count for a client.
///
/// `missed` is position distance in the sorted version list, not elapsed
/// time. An unknown or foreign `current` is treated as maximally stale.
pub fn decide(manifest: &Manifest, current: Option<&str>) -> (Strategy, usize) {
    let versions = &manifest.versions;
    let latest = manifest.latest_version.as_str();
    if versions.is_empty() || latest.is_empty() {
        return (Strategy::Full, 0);
    }

    let total = versions.len();
    let current = match current {
        Some(v) if !v.is_empty() => v,
        _ => return (Strategy::Full, total),
    };

    let position = |needle: &str| versions.iter().position(|row| row.version == needle);
    let (current_i, latest_i) = match (position(current), position(latest)) {
        (Some(c), Some(l)) => (c, l),
        _ => return (Strategy::Full, total),
    };

    if current_i == latest_i {
        return (Strategy::Noop, 0);
    }
    if current_i > latest_i {
        // Manifest inconsistency (current sorts after latest); treat as
        // maximally stale rather than underflow.
        return (Strategy::Full, total);
    }

    let missed = latest_i - current_i;
    let policy = &manifest.sync_policy;

    if missed >= policy.force_full_threshold_missed {
        return (Strategy::Full, missed);
    }

    if missed >= policy.compacted_threshold_missed {
        let has_compacted = manifest
            .compacted_patches
            .iter()
            .any(|row| row.from_version == current && row.to_version == latest);
        if has_compacted {
            return (Strategy::Compacted, missed);
        }
    }

    (Strategy::Chain, missed)
}
