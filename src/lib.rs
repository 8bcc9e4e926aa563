//! # cardsync
//!
//! Distributes a periodically refreshed card price/metadata dataset to many
//! lightweight clients without forcing a full re-download on every update.
//!
//! Two collaborating halves:
//!
//! - the **pipeline**, a scheduled single-runner batch job that ingests a raw
//!   bulk dataset, produces an immutable versioned snapshot, rebuilds the
//!   incremental patch chain plus a trailing window of compacted patches, and
//!   atomically publishes a manifest;
//! - the **sync API**, a rate-limited HTTP surface that, given a client's
//!   current version, decides the cheapest valid catch-up strategy (`noop`,
//!   `chain`, `compacted`, `full`) and serves the matching artifact.
//!
//! ```text
//! bulk JSON ──▶ normalize ──▶ snapshot ──▶ patch graph ──▶ manifest
//!                                                             │
//!                                          clients ◀── sync API (axum)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire/disk data model |
//! | [`normalize`] | Raw upstream record → canonical record boundary |
//! | [`store`] | Snapshot persistence, hashing, JSON plumbing |
//! | [`diff`] | Added/updated/removed patch construction |
//! | [`graph`] | Whole-chain patch graph rebuild |
//! | [`index`] | Version index and manifest builder |
//! | [`strategy`] | Pure sync strategy decision |
//! | [`ratelimit`] | Per-client token bucket |
//! | [`server`] | Sync API HTTP server |
//! | [`pipeline`] | Batch command orchestration |

pub mod config;
pub mod diff;
pub mod graph;
pub mod index;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
pub mod store;
pub mod strategy;
