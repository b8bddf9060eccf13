use crate::cohort::{load_approved_results, load_cohort};
use crate::config::ResultsConfig;
use crate::ipc::helpers::{optional_str, parse_filter, parse_key, with_config, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn results_cohort(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let cohort = load_cohort(conn, &key, cfg)?;
    Ok(json!({ "key": key, "status": cohort.set.status, "students": cohort.students }))
}

/// Published results only; `key` (or top-level filters) narrows the sets.
fn results_approved(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let filter = match params.get("key") {
        Some(k) if k.is_object() => parse_filter(k)?,
        Some(Value::Null) | None => parse_filter(params)?,
        Some(_) => return Err(HandlerErr::bad_params("key must be an object")),
    };
    let student_id = optional_str(params, "studentId")?;
    let approved = load_approved_results(conn, &filter, student_id.as_deref(), cfg)?;
    Ok(json!({ "results": approved.results, "failures": approved.failures }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &ResultsConfig, &Value) -> Result<Value, HandlerErr> =
        match req.method.as_str() {
            "results.cohort" => results_cohort,
            "results.approved" => results_approved,
            _ => return None,
        };
    Some(with_config(state, req, |conn, cfg| handler(conn, cfg, &req.params)))
}
