// src/fetch/types.rs
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 12_000;

/// Wire format of an upstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Csv,
    Json,
    Rss,
    /// Degraded-confidence regex scrape; always tried last.
    HtmlScrape,
}

/// Which end of a decoded feed holds the most recent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_as_of_hint() -> Vec<String> {
    ["date", "time", "period", "published"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Accept either `hint = "close"` or `hint = ["total", "all"]`.
fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// One candidate upstream in a source chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Human-readable label used in provenance.
    pub name: String,
    /// URL template; `file://` reads from disk.
    pub url: String,
    pub format: Format,
    /// Column hints in priority order (case-insensitive substring match).
    #[serde(default, deserialize_with = "one_or_many")]
    pub field_hint: Vec<String>,
    /// Second column for two-field readings.
    #[serde(default, deserialize_with = "one_or_many")]
    pub pair_hint: Vec<String>,
    #[serde(default = "default_as_of_hint", deserialize_with = "one_or_many")]
    pub as_of_hint: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub row_order: RowOrder,
    #[serde(default = "default_true")]
    pub header: bool,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>, format: Format) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            format,
            field_hint: Vec::new(),
            pair_hint: Vec::new(),
            as_of_hint: default_as_of_hint(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            row_order: RowOrder::default(),
            header: true,
        }
    }

    pub fn with_hint<S: AsRef<str>>(mut self, hints: &[S]) -> Self {
        self.field_hint = hints.iter().map(|h| h.as_ref().to_lowercase()).collect();
        self
    }

    pub fn with_pair_hint<S: AsRef<str>>(mut self, hints: &[S]) -> Self {
        self.pair_hint = hints.iter().map(|h| h.as_ref().to_lowercase()).collect();
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_row_order(mut self, order: RowOrder) -> Self {
        self.row_order = order;
        self
    }

    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Exclusive numeric bounds used to reject false-positive matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Plausible {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Plausible {
    pub const ANY: Plausible = Plausible {
        min: None,
        max: None,
    };

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && self.min.map_or(true, |m| v > m) && self.max.map_or(true, |m| v < m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    #[default]
    Scalar,
    Pair,
    Records,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unit {
    #[default]
    Number,
    Percent,
}

/// One column of a `records` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(deserialize_with = "one_or_many")]
    pub hint: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_precision() -> u32 {
    2
}

fn default_labels() -> Vec<String> {
    vec!["bull".to_string(), "bear".to_string()]
}

fn default_limit() -> usize {
    20
}

/// A named output field plus the ordered chain of sources that can answer it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub range: Plausible,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl FieldSpec {
    pub fn scalar(key: impl Into<String>, range: Plausible, sources: Vec<SourceSpec>) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::Scalar,
            range,
            precision: default_precision(),
            unit: Unit::Number,
            labels: default_labels(),
            columns: Vec::new(),
            limit: default_limit(),
            sources,
        }
    }

    pub fn pair(key: impl Into<String>, range: Plausible, sources: Vec<SourceSpec>) -> Self {
        Self {
            kind: FieldKind::Pair,
            precision: 1,
            unit: Unit::Percent,
            ..Self::scalar(key, range, sources)
        }
    }

    pub fn records(
        key: impl Into<String>,
        columns: Vec<ColumnSpec>,
        sources: Vec<SourceSpec>,
    ) -> Self {
        Self {
            kind: FieldKind::Records,
            columns,
            ..Self::scalar(key, Plausible::ANY, sources)
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }
}

/// A record row: column name -> cell (None when the feed lacks that column).
pub type Record = BTreeMap<String, Option<String>>;

/// The raw value pulled out of one decoded body.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Scalar(f64),
    Pair(f64, f64),
    Records(Vec<Record>),
}

/// Extractor output before provenance is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: Reading,
    pub as_of: Option<String>,
}

/// Outcome of the attempt that answered a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub value: Reading,
    pub as_of: Option<String>,
    pub source_name: String,
    /// URL template, never the expanded URL.
    pub source_url: String,
    /// Zero-based position of the answering source within its chain.
    pub position: usize,
}
