use crate::cases::{
    create_discipline_case, create_exeat, decide_exeat, list_discipline_cases, list_exeats,
    set_discipline_status, DisciplineStatus, ExeatStatus, NewDisciplineCase, NewExeatApplication,
};
use crate::ipc::helpers::{optional_str, parse_params, required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn discipline_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewDisciplineCase = parse_params(params)?;
    let case = create_discipline_case(conn, &input)?;
    Ok(json!({ "case": case }))
}

fn discipline_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = optional_str(params, "classId")?;
    let student_id = optional_str(params, "studentId")?;
    let cases = list_discipline_cases(conn, class_id.as_deref(), student_id.as_deref())?;
    Ok(json!({ "cases": cases }))
}

fn discipline_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let raw = required_str(params, "status")?;
    let status = DisciplineStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: pending, reviewed, resolved")
    })?;
    let note = optional_str(params, "resolution")?;
    let case = set_discipline_status(conn, &id, status, note.as_deref())?;
    Ok(json!({ "case": case }))
}

fn exeat_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewExeatApplication = parse_params(params)?;
    let app = create_exeat(conn, &input)?;
    Ok(json!({ "exeat": app }))
}

fn exeat_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = optional_str(params, "classId")?;
    let student_id = optional_str(params, "studentId")?;
    let apps = list_exeats(conn, class_id.as_deref(), student_id.as_deref())?;
    Ok(json!({ "exeats": apps }))
}

fn exeat_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let raw = required_str(params, "status")?;
    let status = ExeatStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: approved, rejected"))?;
    let actor = required_str(params, "actor")?;
    let note = optional_str(params, "note")?;
    let app = decide_exeat(conn, &id, status, &actor, note.as_deref())?;
    Ok(json!({ "exeat": app }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "discipline.create" => discipline_create,
        "discipline.list" => discipline_list,
        "discipline.setStatus" => discipline_set_status,
        "exeat.create" => exeat_create,
        "exeat.list" => exeat_list,
        "exeat.setStatus" => exeat_set_status,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| handler(conn, &req.params)))
}
