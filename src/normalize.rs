// src/normalize.rs
//! Result normalizer: per-field extraction outcomes -> one `SnapshotResult`.
//!
//! Stale policy: a snapshot is stale when at least one field is null, so
//! `stale == false` always means every field carries a value. `error` is only
//! set when every field is null.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::fetch::types::{FieldKind, FieldSpec, Reading, Unit};
use crate::fetch::{Attempt, ExtractionResult};

/// Aggregated result for one snapshot. Every declared field is present,
/// `null` when it could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    pub as_of: BTreeMap<String, Option<String>>,
    pub stale: bool,
    pub sources: Vec<String>,
    pub updated_at: String,
    pub error: Option<String>,
}

impl SnapshotResult {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }
}

/// What the pipeline produced for one field.
#[derive(Debug, Clone)]
pub struct FieldOutcome<'a> {
    pub field: &'a FieldSpec,
    pub result: Option<ExtractionResult>,
    pub attempts: Vec<Attempt>,
    pub cached: bool,
}

pub fn normalize(outcomes: &[FieldOutcome<'_>], updated_at: DateTime<Utc>) -> SnapshotResult {
    let mut fields = BTreeMap::new();
    let mut as_of = BTreeMap::new();
    let mut sources = Vec::with_capacity(outcomes.len());

    for o in outcomes {
        let key = o.field.key.clone();
        let (value, label) = match &o.result {
            Some(res) => match normalize_reading(o.field, &res.value) {
                Ok(v) => (Some(v), answered_label(o, res)),
                Err(why) => (
                    None,
                    format!("{key}: {} (rejected: {why})", res.source_name),
                ),
            },
            None => (None, exhausted_label(o)),
        };
        let stamp = value
            .as_ref()
            .and(o.result.as_ref())
            .and_then(|r| r.as_of.clone());

        fields.insert(key.clone(), value.unwrap_or(Value::Null));
        as_of.insert(key, stamp);
        sources.push(label);
    }

    let nulls: Vec<&str> = outcomes
        .iter()
        .filter(|o| fields.get(&o.field.key).map_or(true, Value::is_null))
        .map(|o| o.field.key.as_str())
        .collect();
    let stale = !nulls.is_empty();
    let error = (!outcomes.is_empty() && nulls.len() == outcomes.len())
        .then(|| format!("data unavailable: no source answered for {}", nulls.join(", ")));

    SnapshotResult {
        fields,
        as_of,
        stale,
        sources,
        updated_at: updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        error,
    }
}

fn answered_label(o: &FieldOutcome<'_>, res: &ExtractionResult) -> String {
    let key = &o.field.key;
    if o.cached {
        format!("{key}: {} (cached)", res.source_name)
    } else if res.position > 0 {
        format!(
            "{key}: {} (fallback after {} failed)",
            res.source_name, res.position
        )
    } else {
        format!("{key}: {}", res.source_name)
    }
}

fn exhausted_label(o: &FieldOutcome<'_>) -> String {
    let key = &o.field.key;
    if o.field.sources.is_empty() {
        return format!("{key}: no source configured");
    }
    let tried: Vec<&str> = o.attempts.iter().map(|a| a.source_name.as_str()).collect();
    format!("{key}: unavailable (tried {})", tried.join(", "))
}

/// Whether `reading` survives scaling and the range re-check for `field`.
pub fn accepts(field: &FieldSpec, reading: &Reading) -> bool {
    normalize_reading(field, reading).is_ok()
}

pub fn round_to(v: f64, precision: u32) -> f64 {
    let f = 10f64.powi(precision.min(10) as i32);
    (v * f).round() / f
}

/// Scale, range-check and round a reading into its output JSON shape.
fn normalize_reading(field: &FieldSpec, reading: &Reading) -> Result<Value, &'static str> {
    match (field.kind, reading) {
        (FieldKind::Scalar, Reading::Scalar(v)) => {
            let [v] = scale(field, [*v]);
            checked(field, v).map(|v| json!(v))
        }
        (FieldKind::Pair, Reading::Pair(a, b)) => {
            let [a, b] = scale(field, [*a, *b]);
            let a = checked(field, a)?;
            let b = checked(field, b)?;
            let mut obj = Map::new();
            obj.insert(label(field, 0), json!(a));
            obj.insert(label(field, 1), json!(b));
            Ok(Value::Object(obj))
        }
        (FieldKind::Records, Reading::Records(rows)) => {
            let items: Vec<Value> = rows
                .iter()
                .take(field.limit)
                .map(|r| json!(r))
                .collect();
            if items.is_empty() {
                Err("no records")
            } else {
                Ok(Value::Array(items))
            }
        }
        _ => Err("shape mismatch"),
    }
}

/// Percent fields given as fractions (all values within [-1, 1]) are scaled to percent.
fn scale<const N: usize>(field: &FieldSpec, vals: [f64; N]) -> [f64; N] {
    if field.unit == Unit::Percent && vals.iter().all(|v| v.abs() <= 1.0) {
        vals.map(|v| v * 100.0)
    } else {
        vals
    }
}

fn checked(field: &FieldSpec, v: f64) -> Result<f64, &'static str> {
    if field.range.contains(v) {
        Ok(round_to(v, field.precision))
    } else {
        Err("out of range")
    }
}

fn label(field: &FieldSpec, i: usize) -> String {
    field
        .labels
        .get(i)
        .cloned()
        .unwrap_or_else(|| if i == 0 { "first" } else { "second" }.to_string())
}
