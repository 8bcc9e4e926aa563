//! Core data models shared by the pipeline and the sync API.
//!
//! Every struct here maps one-to-one onto a JSON artifact on disk or on the
//! wire, so they all serialize with camelCase field names and are written in
//! compact form. Field order matters for the structs that get hashed
//! ([`PatchBody`]): the hash covers the compact serialization, so reordering
//! fields would change published hashes.

use serde::{Deserialize, Serialize};

/// One card record in its canonical minimal shape.
///
/// Whole-record structural equality (`PartialEq`) is what the diff engine
/// uses to decide whether a shared id counts as "updated".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub id: String,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub image_url: Option<String>,
    pub market_price: f64,
    pub updated_at: String,
}

/// Catalogue entry for one published snapshot version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: String,
    pub snapshot_path: String,
    pub snapshot_hash: String,
    #[serde(default)]
    pub patch_from_previous: Option<String>,
    #[serde(default)]
    pub patch_hash: Option<String>,
    pub row_count: usize,
    pub created_at: String,
}

/// The hashable body of a patch, serialized exactly in this field order.
///
/// `patchHash` is computed over this shape and then attached to form a
/// [`Patch`], so the hash never covers itself.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchBody<'a> {
    pub from_version: &'a str,
    pub to_version: &'a str,
    pub added: &'a [NormalizedRecord],
    pub updated: &'a [NormalizedRecord],
    pub removed: &'a [String],
}

/// A persisted added/updated/removed delta between two versions.
///
/// `added` and `updated` carry full post-state records; `removed` carries ids
/// only. Consumers replace wholesale and delete locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub from_version: String,
    pub to_version: String,
    pub added: Vec<NormalizedRecord>,
    pub updated: Vec<NormalizedRecord>,
    pub removed: Vec<String>,
    pub patch_hash: String,
}

/// Manifest entry for a patch that jumps straight from an older retained
/// version to the latest one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactedPatchEntry {
    pub from_version: String,
    pub to_version: String,
    pub path: String,
    pub patch_hash: String,
    pub created_at: String,
}

/// Strategy thresholds published in the manifest for clients and applied by
/// the server. Values are injected from configuration, never computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub compacted_threshold_missed: usize,
    pub force_full_threshold_missed: usize,
    pub compacted_retention_days: usize,
    pub expected_publish_time_utc: String,
    pub refresh_unlock_lag_minutes: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            compacted_threshold_missed: 5,
            force_full_threshold_missed: 21,
            compacted_retention_days: 21,
            expected_publish_time_utc: "22:30".to_string(),
            refresh_unlock_lag_minutes: 60,
        }
    }
}

/// The single published artifact consumers read to decide how to sync.
///
/// Rebuilt wholesale on every pipeline run and replaced atomically; the
/// server treats it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub dataset: String,
    pub latest_version: String,
    pub latest_snapshot: String,
    pub latest_hash: String,
    pub sync_policy: SyncPolicy,
    pub versions: Vec<VersionEntry>,
    pub compacted_patches: Vec<CompactedPatchEntry>,
    pub generated_at: String,
}

/// The mutable working index behind the manifest (`versions_index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsIndex {
    pub dataset: String,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub compacted_patches: Vec<CompactedPatchEntry>,
}

impl VersionsIndex {
    pub fn empty(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            versions: Vec::new(),
            compacted_patches: Vec::new(),
        }
    }
}
