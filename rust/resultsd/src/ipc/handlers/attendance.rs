use crate::attendance::{effective_records, insert_record, list_records, NewAttendanceRecord};
use crate::ipc::helpers::{optional_date, optional_str, parse_params, required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn attendance_submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewAttendanceRecord = parse_params(params)?;
    let record = insert_record(conn, &input)?;
    tracing::info!(
        class_id = %record.class_id,
        date = %record.date,
        subject = %record.subject,
        supersedes = ?record.supersedes,
        "attendance recorded"
    );
    Ok(json!({ "record": record }))
}

/// Every stored record, or only the effective ones with `effectiveOnly`.
fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let subject = optional_str(params, "subject")?;
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    let effective_only = params
        .get("effectiveOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let records = list_records(conn, &class_id, from, to, subject.as_deref())?;
    if effective_only {
        return Ok(json!({ "records": effective_records(&records) }));
    }
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.submit" => Some(with_conn(state, req, |c| attendance_submit(c, &req.params))),
        "attendance.list" => Some(with_conn(state, req, |c| attendance_list(c, &req.params))),
        _ => None,
    }
}
