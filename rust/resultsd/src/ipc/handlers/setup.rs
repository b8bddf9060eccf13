use crate::config::{load_section, update_section, SetupSection};
use crate::ipc::helpers::{required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

fn setup_get(conn: &rusqlite::Connection) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(section.name().to_string(), load_section(conn, section)?);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &rusqlite::Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = required_str(params, "section")?;
    let section = SetupSection::parse(&section_raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "unknown section".to_string(),
        details: Some(json!({ "section": section_raw })),
    })?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    match update_section(conn, section, patch)? {
        Ok(updated) => {
            tracing::info!(section = section.name(), "settings updated");
            Ok(json!({ "section": section.name(), "value": updated }))
        }
        Err(msg) => Err(HandlerErr {
            code: "validation_failed",
            message: msg,
            details: Some(json!({ "section": section.name() })),
        }),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_conn(state, req, setup_get)),
        "setup.update" => Some(with_conn(state, req, |conn| setup_update(conn, &req.params))),
        _ => None,
    }
}
