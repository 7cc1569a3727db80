use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Env var naming the source file to load lazily at startup.
pub const SOURCE_ENV: &str = "DASHBOARDD_SOURCE";
/// Env var holding the `tracing` filter directive.
pub const LOG_ENV: &str = "DASHBOARDD_LOG";

/// Header overrides for the well-known columns. `None` means "use the built-in names".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnNames {
    pub date: Option<String>,
    pub district: Option<String>,
    pub school: Option<String>,
    pub teacher: Option<String>,
    pub segment_a: Option<String>,
    pub segment_b: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionCaps {
    pub district_schools: usize,
    pub compare_schools: usize,
    pub teachers: usize,
}

impl Default for SelectionCaps {
    fn default() -> Self {
        Self {
            district_schools: 10,
            compare_schools: 20,
            teachers: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    #[serde(rename = "path")]
    pub source: PathBuf,
    #[serde(default)]
    pub columns: ColumnNames,
    /// Explicit sub-item columns; skips discovery when present.
    #[serde(default)]
    pub item_columns: Option<Vec<String>>,
    #[serde(default)]
    pub caps: SelectionCaps,
}

impl DashboardConfig {
    pub fn for_source(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            columns: ColumnNames::default(),
            item_columns: None,
            caps: SelectionCaps::default(),
        }
    }

    pub fn from_params(params: &serde_json::Value) -> anyhow::Result<Self> {
        let mut cfg: DashboardConfig = serde_json::from_value(params.clone())
            .context("dataset.open params must include a string path")?;
        if cfg.source.as_os_str().is_empty() {
            anyhow::bail!("path must not be empty");
        }
        if cfg.caps.district_schools == 0 || cfg.caps.compare_schools == 0 || cfg.caps.teachers == 0
        {
            anyhow::bail!("selection caps must be at least 1");
        }
        if let Some(items) = cfg.item_columns.as_mut() {
            items.retain(|s| !s.trim().is_empty());
        }
        Ok(cfg)
    }
}

/// First CLI argument wins over the env var.
pub fn initial_source<I>(mut args: I) -> Option<PathBuf>
where
    I: Iterator<Item = String>,
{
    if let Some(arg) = args.find(|a| !a.trim().is_empty()) {
        return Some(PathBuf::from(arg));
    }
    std::env::var(SOURCE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}
