use crate::cache::DatasetCache;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    /// `None` until a source is configured, by `dataset.open` or at startup.
    pub cache: Option<DatasetCache>,
}
