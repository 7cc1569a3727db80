use crate::config::SelectionCaps;
use crate::dataset::{parse_date_text, Dataset, LoadError};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::queries::{DateWindow, QueryError};
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                None,
            )),
        },
    }
}

/// Missing or null means an empty selection. Order is preserved.
pub fn string_list(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array of strings", key),
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        out.push(s.to_string());
    }
    Ok(out)
}

pub fn parse_window(req: &Request) -> Result<DateWindow, serde_json::Value> {
    let mut window = DateWindow::default();
    for (key, slot) in [("dateStart", &mut window.start), ("dateEnd", &mut window.end)] {
        let Some(raw) = optional_str(req, key)? else {
            continue;
        };
        let Some(date) = parse_date_text(&raw) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} is not a valid date: {}", key, raw),
                None,
            ));
        };
        *slot = Some(date);
    }
    Ok(window)
}

pub fn load_error(req: &Request, e: &LoadError) -> serde_json::Value {
    err(
        &req.id,
        e.code(),
        e.to_string(),
        Some(json!({ "path": e.path().to_string_lossy() })),
    )
}

pub fn query_error(req: &Request, e: &QueryError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

pub fn caps(state: &AppState) -> SelectionCaps {
    state
        .cache
        .as_ref()
        .map(|c| c.config().caps)
        .unwrap_or_default()
}

pub fn dataset<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a Dataset, serde_json::Value> {
    let Some(cache) = state.cache.as_mut() else {
        return Err(err(&req.id, "no_dataset", "open a dataset first", None));
    };
    cache.get().map_err(|e| load_error(req, &e))
}
