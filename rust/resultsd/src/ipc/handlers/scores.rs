use crate::config::ResultsConfig;
use crate::entries::{
    delete_entry, update_comments, upsert_entries, upsert_entry, CommentsPatch, EntryInput,
};
use crate::ipc::helpers::{parse_key, parse_params, required_str, with_config, HandlerErr};
use crate::model::ScoreComponents;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn scores_upsert(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    // `params` also carries the key, so only `components` is parsed strictly.
    let raw = params
        .get("components")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("components must be an object"))?;
    let components: ScoreComponents = parse_params(raw)?;
    let entry = EntryInput {
        student_id: required_str(params, "studentId")?,
        subject_name: required_str(params, "subjectName")?,
        components,
    };
    let score = upsert_entry(conn, &key, &entry, cfg)?;
    Ok(json!({ "studentId": entry.student_id, "score": score }))
}

fn scores_bulk_upsert(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let raw = params
        .get("entries")
        .filter(|v| v.is_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;
    let entries: Vec<EntryInput> = parse_params(raw)?;
    let scores = upsert_entries(conn, &key, &entries, cfg)?;
    tracing::info!(key = %key, count = scores.len(), "scores saved");
    Ok(json!({ "saved": scores.len(), "scores": scores }))
}

fn scores_delete(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let student_id = required_str(params, "studentId")?;
    let subject_name = required_str(params, "subjectName")?;
    let removed = delete_entry(conn, &key, &student_id, &subject_name)?;
    Ok(json!({ "removed": removed }))
}

/// Absent leaves the field, null or blank clears it.
fn comment_field(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(s.clone()))),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be a string or null",
            key
        ))),
    }
}

fn comments_update(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let student_id = required_str(params, "studentId")?;
    let patch = CommentsPatch {
        teacher_comment: comment_field(params, "teacherComment")?,
        principal_comment: comment_field(params, "principalComment")?,
    };
    if patch.teacher_comment.is_none() && patch.principal_comment.is_none() {
        return Err(HandlerErr::bad_params(
            "teacherComment or principalComment is required",
        ));
    }
    let comments = update_comments(conn, &key, &student_id, &patch)?;
    Ok(json!({ "studentId": student_id, "comments": comments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &ResultsConfig, &Value) -> Result<Value, HandlerErr> =
        match req.method.as_str() {
            "scores.upsert" => scores_upsert,
            "scores.bulkUpsert" => scores_bulk_upsert,
            "scores.delete" => scores_delete,
            "comments.update" => comments_update,
            _ => return None,
        };
    Some(with_config(state, req, |conn, cfg| handler(conn, cfg, &req.params)))
}
