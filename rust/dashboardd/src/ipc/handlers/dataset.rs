use crate::cache::DatasetCache;
use crate::config::DashboardConfig;
use crate::dataset::Dataset;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{dataset, load_error, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::queries;
use serde_json::json;

fn info_json(ds: &Dataset) -> serde_json::Value {
    let bounds = ds.date_bounds();
    let labels: serde_json::Map<String, serde_json::Value> = ds
        .fields
        .present()
        .into_iter()
        .filter_map(|f| ds.label(f).map(|l| (f.key().to_string(), json!(l))))
        .collect();
    json!({
        "sourcePath": ds.source_path.to_string_lossy(),
        "fingerprint": ds.fingerprint,
        "rowCount": ds.row_count(),
        "dateMin": bounds.map(|b| b.0.to_string()),
        "dateMax": bounds.map(|b| b.1.to_string()),
        "columns": {
            "present": ds.fields.present(),
            "missing": ds.fields.missing(),
            "labels": labels,
        },
        "itemColumns": ds.item_columns,
        "discoveryStage": ds.discovery_stage,
        "notices": ds.notices,
    })
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let config = match DashboardConfig::from_params(&req.params) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
    };
    // A failed open keeps whatever source was configured before.
    let mut cache = DatasetCache::new(config);
    let info = match cache.reload() {
        Ok(ds) => info_json(ds),
        Err(e) => return load_error(req, &e),
    };
    state.cache = Some(cache);
    ok(&req.id, info)
}

fn handle_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_mut() else {
        return err(&req.id, "no_dataset", "open a dataset first", None);
    };
    match cache.reload() {
        Ok(ds) => ok(&req.id, info_json(ds)),
        Err(e) => load_error(req, &e),
    }
}

fn handle_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    match dataset(state, req) {
        Ok(ds) => ok(&req.id, info_json(ds)),
        Err(resp) => resp,
    }
}

fn handle_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let district = match optional_str(req, "district") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let school = match optional_str(req, "school") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ds = match dataset(state, req) {
        Ok(ds) => ds,
        Err(resp) => return resp,
    };
    let options = queries::options(ds, district.as_deref(), school.as_deref());
    ok(&req.id, json!(options))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.open" => Some(handle_open(state, req)),
        "dataset.reload" => Some(handle_reload(state, req)),
        "dataset.info" => Some(handle_info(state, req)),
        "dataset.options" => Some(handle_options(state, req)),
        _ => None,
    }
}
