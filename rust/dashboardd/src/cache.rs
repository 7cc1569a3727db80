use crate::config::DashboardConfig;
use crate::dataset::{load_dataset, Dataset, LoadError, LoadOptions};
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl SourceStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

struct Loaded {
    dataset: Dataset,
    stamp: Option<SourceStamp>,
}

/// The dataset for one configured source, loaded on first use and reloaded
/// when the file's length or mtime changes.
pub struct DatasetCache {
    config: DashboardConfig,
    loaded: Option<Loaded>,
}

impl DatasetCache {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            loaded: None,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn source_path(&self) -> &Path {
        &self.config.source
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Drops the cached dataset; the next [`DatasetCache::get`] reads the file again.
    pub fn invalidate(&mut self) {
        self.loaded = None;
    }

    fn is_stale(&self) -> bool {
        match &self.loaded {
            None => true,
            Some(l) => {
                let now = SourceStamp::read(&self.config.source);
                now.is_none() || now != l.stamp
            }
        }
    }

    fn load(&mut self) -> Result<(), LoadError> {
        let path = self.config.source.clone();
        let stamp = SourceStamp::read(&path);
        let options = LoadOptions {
            columns: self.config.columns.clone(),
            item_columns: self.config.item_columns.clone(),
        };
        match load_dataset(&path, &options) {
            Ok(dataset) => {
                tracing::info!(
                    path = %path.display(),
                    rows = dataset.row_count(),
                    items = dataset.item_columns.len(),
                    "dataset loaded"
                );
                for notice in &dataset.notices {
                    tracing::warn!(path = %path.display(), "{}", notice);
                }
                self.loaded = Some(Loaded { dataset, stamp });
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %path.display(), code = e.code(), "{}", e);
                self.loaded = None;
                Err(e)
            }
        }
    }

    /// Returns the cached dataset, loading or reloading it first if needed.
    pub fn get(&mut self) -> Result<&Dataset, LoadError> {
        if self.is_stale() {
            if self.loaded.is_some() {
                tracing::info!(path = %self.config.source.display(), "source changed; reloading");
            }
            self.load()?;
        }
        self.current()
    }

    /// Unconditionally re-reads the source.
    pub fn reload(&mut self) -> Result<&Dataset, LoadError> {
        self.load()?;
        self.current()
    }

    fn current(&self) -> Result<&Dataset, LoadError> {
        self.loaded
            .as_ref()
            .map(|l| &l.dataset)
            .ok_or_else(|| LoadError::data_load(&self.config.source, "dataset is not loaded"))
    }
}
