//! Record normalizer: the tolerant parsing boundary between the loosely
//! shaped upstream bulk JSON and the strongly typed [`NormalizedRecord`].
//!
//! Nothing past this module ever sees the raw upstream shape. Records
//! without a stable id are dropped, not errored; a missing or malformed
//! price coerces to `0.0`; duplicate ids within one snapshot are a hard
//! validation error.

use anyhow::Result;
use serde_json::Value;

use crate::models::NormalizedRecord;

/// Map one raw upstream card object into the canonical record shape.
///
/// Returns `None` when the record lacks a non-empty `id`.
pub fn normalize_record(card: &Value) -> Option<NormalizedRecord> {
    let id = non_empty_str(card.get("id"))?;

    Some(NormalizedRecord {
        id: id.to_string(),
        name: str_or_default(card.get("name")),
        set_code: str_or_default(card.get("set")).to_lowercase(),
        collector_number: str_or_default(card.get("collector_number")),
        image_url: pick_image_url(card),
        market_price: parse_market_price(card),
        updated_at: str_or_default(card.get("released_at")),
    })
}

/// Normalize a whole raw snapshot: drop id-less records, sort ascending by
/// id, reject duplicate ids.
pub fn normalize_snapshot(cards: Vec<Value>) -> Result<Vec<NormalizedRecord>> {
    let mut out: Vec<NormalizedRecord> = cards.iter().filter_map(normalize_record).collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));

    // Sorted order makes duplicate detection a single adjacent scan.
    for pair in out.windows(2) {
        if pair[0].id == pair[1].id {
            anyhow::bail!("Duplicate record id in source snapshot: {}", pair[0].id);
        }
    }

    Ok(out)
}

/// Prefer the primary normal-size image; fall back to the first card face's
/// image; otherwise none.
fn pick_image_url(card: &Value) -> Option<String> {
    if let Some(url) = non_empty_str(card.pointer("/image_uris/normal")) {
        return Some(url.to_string());
    }
    non_empty_str(card.pointer("/card_faces/0/image_uris/normal")).map(|url| url.to_string())
}

/// Price parsing never fails: missing, empty, or non-numeric values coerce
/// to 0.0. The upstream encodes prices as strings but numbers are accepted
/// too.
fn parse_market_price(card: &Value) -> f64 {
    match card.pointer("/prices/usd") {
        Some(Value::String(raw)) => raw.trim().parse().unwrap_or(0.0),
        Some(Value::Number(num)) => num.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn str_or_default(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}
