use crate::cohort::freeze_cohort;
use crate::config::ResultsConfig;
use crate::ipc::helpers::{parse_key, required_str, with_config, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::workflow::ApprovalWorkflow;
use rusqlite::Connection;
use serde_json::{json, Value};

fn actor(params: &Value) -> Result<String, HandlerErr> {
    let a = required_str(params, "actor")?.trim().to_string();
    if a.is_empty() {
        return Err(HandlerErr::bad_params("actor must not be empty"));
    }
    Ok(a)
}

fn submit(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let actor = actor(params)?;
    let snapshot = freeze_cohort(conn, &key, cfg)?;
    let set = ApprovalWorkflow::new(conn).submit(&key, &actor, snapshot)?;
    Ok(json!({ "resultSet": set }))
}

fn approve(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let set = ApprovalWorkflow::new(conn).approve(&key, &actor(params)?)?;
    Ok(json!({ "resultSet": set }))
}

fn reject(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let reason = required_str(params, "reason")?;
    let set = ApprovalWorkflow::new(conn).reject(&key, &actor(params)?, &reason)?;
    Ok(json!({ "resultSet": set }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &ResultsConfig, &Value) -> Result<Value, HandlerErr> =
        match req.method.as_str() {
            "workflow.submit" => submit,
            "workflow.approve" => approve,
            "workflow.reject" => reject,
            _ => return None,
        };
    Some(with_config(state, req, |conn, cfg| handler(conn, cfg, &req.params)))
}
