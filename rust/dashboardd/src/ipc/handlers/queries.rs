use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    caps, dataset, optional_str, parse_window, query_error, required_str, string_list,
};
use crate::ipc::types::{AppState, Request};
use crate::queries::{self, Granularity};
use serde_json::json;

fn respond<T: serde::Serialize>(
    req: &Request,
    result: Result<T, queries::QueryError>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, json!(v)),
        Err(e) => query_error(req, &e),
    }
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let granularity = match optional_str(req, "granularity") {
        Ok(None) => Granularity::Month,
        Ok(Some(raw)) => match Granularity::parse(&raw) {
            Some(g) => g,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("granularity must be month or academicYear, got {}", raw),
                    None,
                )
            }
        },
        Err(resp) => return resp,
    };
    let window = match parse_window(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let ds = match dataset(state, req) {
        Ok(ds) => ds,
        Err(resp) => return resp,
    };
    respond(req, queries::overview(ds, window, granularity))
}

fn handle_district_compare(state: &mut AppState, req: &Request) -> serde_json::Value {
    let district = match optional_str(req, "district") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let schools = match string_list(req, "schools") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window = match parse_window(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let cap = caps(state).district_schools;
    let ds = match dataset(state, req) {
        Ok(ds) => ds,
        Err(resp) => return resp,
    };
    respond(
        req,
        queries::district_compare(ds, window, district.as_deref(), &schools, cap),
    )
}

fn handle_school_compare(state: &mut AppState, req: &Request) -> serde_json::Value {
    let metric = match required_str(req, "metric") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let schools = match string_list(req, "schools") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window = match parse_window(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let cap = caps(state).compare_schools;
    let ds = match dataset(state, req) {
        Ok(ds) => ds,
        Err(resp) => return resp,
    };
    respond(req, queries::school_compare(ds, window, &schools, &metric, cap))
}

fn handle_school_breakdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school = match required_str(req, "school") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teachers = match string_list(req, "teachers") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window = match parse_window(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let cap = caps(state).teachers;
    let ds = match dataset(state, req) {
        Ok(ds) => ds,
        Err(resp) => return resp,
    };
    respond(
        req,
        queries::school_breakdown(ds, window, &school, &teachers, cap),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "query.overview" => Some(handle_overview(state, req)),
        "query.districtCompare" => Some(handle_district_compare(state, req)),
        "query.schoolCompare" => Some(handle_school_compare(state, req)),
        "query.schoolBreakdown" => Some(handle_school_breakdown(state, req)),
        _ => None,
    }
}
