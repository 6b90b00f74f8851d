// src/config/sources.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::fetch::types::{FieldKind, FieldSpec, Format};

pub const ENV_SOURCES_PATH: &str = "BRIEFING_SOURCES_PATH";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.toml";

/// Catalog compiled into the binary, used when no file is found at runtime.
const BUILTIN_CATALOG: &str = include_str!("../../config/sources.toml");

/// Output keys owned by the normalizer; a field may not shadow them.
const RESERVED_KEYS: &[&str] = &["stale", "sources", "updatedAt", "error", "asOf"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Every snapshot the service can assemble, with the source chain of each field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCatalog {
    #[serde(default)]
    pub snapshots: Vec<SnapshotSpec>,
}

impl SourceCatalog {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut catalog: SourceCatalog = toml::from_str(s).context("parsing source catalog")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading source catalog from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG).context("embedded source catalog")
    }

    /// Load using env var + fallbacks:
    /// 1) $BRIEFING_SOURCES_PATH (must exist)
    /// 2) config/sources.toml
    /// 3) catalog embedded at build time
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_SOURCES_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            info!(target: "config", path = %pb.display(), "loading source catalog");
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_SOURCES_PATH);
        if default_p.exists() {
            info!(target: "config", path = DEFAULT_SOURCES_PATH, "loading source catalog");
            return Self::load_from(&default_p);
        }
        info!(target: "config", "using embedded source catalog");
        Self::builtin()
    }

    pub fn snapshot(&self, name: &str) -> Option<&SnapshotSpec> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|s| s.name.as_str())
    }

    /// Reject ambiguous catalogs and normalize the rest in place.
    fn validate(&mut self) -> Result<()> {
        let mut names = HashSet::new();
        for snap in &mut self.snapshots {
            if snap.name.trim().is_empty() {
                bail!("snapshot with empty name");
            }
            if !names.insert(snap.name.clone()) {
                bail!("duplicate snapshot name {:?}", snap.name);
            }
            let mut keys = HashSet::new();
            for field in &mut snap.fields {
                let ctx = format!("{}.{}", snap.name, field.key);
                if field.key.trim().is_empty() {
                    bail!("field with empty key in snapshot {:?}", snap.name);
                }
                if RESERVED_KEYS.contains(&field.key.as_str()) {
                    bail!("{ctx}: field key is reserved");
                }
                if !keys.insert(field.key.clone()) {
                    bail!("{ctx}: duplicate field key");
                }
                normalize_field(field);
                check_field(field).with_context(|| ctx.clone())?;

                if !field.sources.is_empty()
                    && field.sources.iter().all(|s| s.format == Format::HtmlScrape)
                {
                    warn!(target: "config", field = %ctx, "only html-scrape sources configured");
                }
            }
        }
        Ok(())
    }
}

fn lowercase(v: &mut [String]) {
    for h in v.iter_mut() {
        *h = h.trim().to_lowercase();
    }
}

fn normalize_field(field: &mut FieldSpec) {
    for col in &mut field.columns {
        lowercase(&mut col.hint);
    }
    for src in &mut field.sources {
        lowercase(&mut src.field_hint);
        lowercase(&mut src.pair_hint);
        lowercase(&mut src.as_of_hint);
    }
    // Stable: structured sources keep their relative order ahead of scrapes.
    field
        .sources
        .sort_by_key(|s| s.format == Format::HtmlScrape);
}

fn check_field(field: &FieldSpec) -> Result<()> {
    if let (Some(min), Some(max)) = (field.range.min, field.range.max) {
        if min >= max {
            bail!("range min {min} must be below max {max}");
        }
    }
    for src in &field.sources {
        if src.name.trim().is_empty() || src.url.trim().is_empty() {
            bail!("source needs a name and a url");
        }
        if src.timeout_ms == 0 {
            bail!("source {:?}: timeout_ms must be positive", src.name);
        }
    }
    match field.kind {
        FieldKind::Scalar => {}
        FieldKind::Pair => {
            if field.labels.len() != 2 {
                bail!("pair field needs exactly two labels");
            }
            if let Some(src) = field
                .sources
                .iter()
                .find(|s| s.field_hint.is_empty() || s.pair_hint.is_empty())
            {
                bail!("pair source {:?} needs field_hint and pair_hint", src.name);
            }
        }
        FieldKind::Records => {
            if field.columns.is_empty() {
                bail!("records field needs at least one column");
            }
            if field.limit == 0 {
                bail!("records limit must be positive");
            }
        }
    }
    Ok(())
}
