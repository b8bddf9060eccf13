use crate::cohort::{ensure_class_removable, require_class};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM result_sets rs WHERE rs.class_id = c.id) AS result_set_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let result_set_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count,
                "resultSetCount": result_set_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    tracing::info!(class_id = %class_id, name = %name, "class created");
    Ok(json!({ "classId": class_id, "name": name }))
}

/// Dependent rows, children first (no ON DELETE CASCADE).
const CLASS_DEPENDENTS: [(&str, &str); 9] = [
    ("subject_scores", "DELETE FROM subject_scores WHERE class_id = ?"),
    ("result_comments", "DELETE FROM result_comments WHERE class_id = ?"),
    ("result_sets", "DELETE FROM result_sets WHERE class_id = ?"),
    (
        "attendance_entries",
        "DELETE FROM attendance_entries
         WHERE record_id IN (SELECT id FROM attendance_records WHERE class_id = ?)",
    ),
    (
        "attendance_records",
        "DELETE FROM attendance_records WHERE class_id = ?",
    ),
    ("discipline_cases", "DELETE FROM discipline_cases WHERE class_id = ?"),
    (
        "exeat_applications",
        "DELETE FROM exeat_applications WHERE class_id = ?",
    ),
    ("students", "DELETE FROM students WHERE class_id = ?"),
    ("classes", "DELETE FROM classes WHERE id = ?"),
];

fn classes_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    ensure_class_removable(conn, &class_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    // Corrections reference the records they supersede.
    tx.execute(
        "UPDATE attendance_records SET supersedes = NULL WHERE class_id = ?",
        [&class_id],
    )?;
    for (table, sql) in CLASS_DEPENDENTS {
        tx.execute(sql, [&class_id]).map_err(|e| HandlerErr {
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
    tracing::info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(with_conn(state, req, |c| classes_create(c, &req.params))),
        "classes.delete" => Some(with_conn(state, req, |c| classes_delete(c, &req.params))),
        _ => None,
    }
}
