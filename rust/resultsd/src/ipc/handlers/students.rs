use crate::cohort::{ensure_student_removable, list_roster, require_class};
use crate::db::now_stamp;
use crate::ipc::helpers::{optional_str, required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn trimmed(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn require_student(conn: &Connection, class_id: &str, student_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (class_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "classId": class_id, "studentId": student_id })),
        });
    }
    Ok(())
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let students = list_roster(conn, &class_id, include_inactive)?;

    let mut extra = conn.prepare(
        "SELECT last_name, first_name, photo_ref FROM students WHERE id = ?",
    )?;
    let mut out = Vec::with_capacity(students.len());
    for s in students {
        let (last_name, first_name, photo_ref): (String, String, Option<String>) =
            extra.query_row([&s.id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        let mut v = serde_json::to_value(&s).map_err(crate::error::ResultsError::from)?;
        v["lastName"] = json!(last_name);
        v["firstName"] = json!(first_name);
        v["photoRef"] = json!(photo_ref);
        out.push(v);
    }
    Ok(json!({ "students": out }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let last_name = required_str(params, "lastName")?.trim().to_string();
    let first_name = required_str(params, "firstName")?.trim().to_string();
    if last_name.is_empty() || first_name.is_empty() {
        return Err(HandlerErr::bad_params("firstName/lastName must not be empty"));
    }
    let admission_no = trimmed(optional_str(params, "admissionNo")?);
    let photo_ref = trimmed(optional_str(params, "photoRef")?);
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    require_class(conn, &class_id)?;

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    )?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
           id, class_id, last_name, first_name, admission_no, photo_ref, active, sort_order,
           updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            admission_no.as_deref(),
            photo_ref.as_deref(),
            if active { 1 } else { 0 },
            sort_order,
            now_stamp(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

fn nullable_text(
    patch: &Map<String, Value>,
    key: &str,
) -> Result<Option<SqlValue>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(SqlValue::Null)),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(Some(if t.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Text(t.to_string())
            }))
        }
        Some(_) => Err(HandlerErr::bad_params(format!(
            "patch.{} must be a string or null",
            key
        ))),
    }
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing/invalid patch"))?;

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<SqlValue> = Vec::new();
    for (key, column) in [("lastName", "last_name = ?"), ("firstName", "first_name = ?")] {
        if let Some(v) = patch.get(key) {
            let s = v
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("patch.{} must be a non-empty string", key))
                })?;
            set_parts.push(column);
            bind_values.push(SqlValue::Text(s.to_string()));
        }
    }
    for (key, column) in [("admissionNo", "admission_no = ?"), ("photoRef", "photo_ref = ?")] {
        if let Some(v) = nullable_text(patch, key)? {
            set_parts.push(column);
            bind_values.push(v);
        }
    }
    if let Some(v) = patch.get("active") {
        let b = v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("patch.active must be a boolean"))?;
        set_parts.push("active = ?");
        bind_values.push(SqlValue::Integer(if b { 1 } else { 0 }));
    }
    if let Some(v) = patch.get("sortOrder") {
        let n = v
            .as_i64()
            .filter(|n| *n >= 0)
            .ok_or_else(|| HandlerErr::bad_params("patch.sortOrder must be a non-negative integer"))?;
        set_parts.push("sort_order = ?");
        bind_values.push(SqlValue::Integer(n));
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch must include at least one field"));
    }
    require_student(conn, &class_id, &student_id)?;

    set_parts.push("updated_at = ?");
    bind_values.push(SqlValue::Text(now_stamp()));
    bind_values.push(SqlValue::Text(class_id));
    bind_values.push(SqlValue::Text(student_id));
    let sql = format!(
        "UPDATE students SET {} WHERE class_id = ? AND id = ?",
        set_parts.join(", ")
    );
    conn.execute(&sql, params_from_iter(bind_values))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    require_student(conn, &class_id, &student_id)?;
    ensure_student_removable(conn, &class_id, &student_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (table, sql) in [
        ("subject_scores", "DELETE FROM subject_scores WHERE student_id = ?"),
        ("result_comments", "DELETE FROM result_comments WHERE student_id = ?"),
        ("attendance_entries", "DELETE FROM attendance_entries WHERE student_id = ?"),
        ("discipline_cases", "DELETE FROM discipline_cases WHERE student_id = ?"),
        ("exeat_applications", "DELETE FROM exeat_applications WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        tx.execute(sql, [&student_id]).map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    tracing::info!(class_id = %class_id, student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.list" => students_list,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| handler(conn, &req.params)))
}
