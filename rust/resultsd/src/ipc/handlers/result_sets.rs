use crate::cohort::require_class;
use crate::config::ResultsConfig;
use crate::ipc::helpers::{parse_filter, parse_key, with_config, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::ResultSetStore;
use crate::workflow::ApprovalWorkflow;
use rusqlite::Connection;
use serde_json::{json, Value};

fn result_sets_create(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    require_class(conn, &key.class_id)?;
    let set = ApprovalWorkflow::new(conn).create(key)?;
    Ok(json!({ "resultSet": set }))
}

fn result_sets_begin(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    require_class(conn, &key.class_id)?;
    let set = ApprovalWorkflow::new(conn).begin(key)?;
    Ok(json!({ "resultSet": set }))
}

fn result_sets_get(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let set = ApprovalWorkflow::new(conn).get(&key)?;
    Ok(json!({ "resultSet": set }))
}

fn result_sets_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = parse_filter(params)?;
    let sets = conn.list(&filter)?;
    Ok(json!({ "resultSets": sets }))
}

fn result_sets_changes(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let since = match params.get("sinceRevision") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("sinceRevision must be an integer"))?,
    };
    let changed = ApprovalWorkflow::new(conn).changes_since(since)?;
    let revision = changed.iter().map(|s| s.revision).max().unwrap_or(since);
    Ok(json!({ "resultSets": changed, "revision": revision }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    match req.method.as_str() {
        "resultSets.create" => Some(with_config(state, req, |c, cfg| result_sets_create(c, cfg, p))),
        "resultSets.begin" => Some(with_config(state, req, |c, cfg| result_sets_begin(c, cfg, p))),
        "resultSets.get" => Some(with_config(state, req, |c, cfg| result_sets_get(c, cfg, p))),
        "resultSets.list" => Some(with_conn(state, req, |c| result_sets_list(c, p))),
        "resultSets.changes" => Some(with_conn(state, req, |c| result_sets_changes(c, p))),
        _ => None,
    }
}
