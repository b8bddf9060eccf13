use crate::attendance::{list_records, summarize_student};
use crate::cohort::{list_roster, load_cohort};
use crate::config::ResultsConfig;
use crate::entries::load_comments;
use crate::ipc::helpers::{
    optional_date, optional_str, parse_key, required_str, with_config, HandlerErr,
};
use crate::calc::GradingContext;
use crate::ipc::types::{AppState, Request};
use crate::reports::{
    build_attendance_broadsheet, build_broadsheet, build_report_card, ReportCardExtras,
};
use rusqlite::Connection;
use serde_json::{json, Value};

fn broadsheet(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let cohort = load_cohort(conn, &key, cfg)?;
    let sheet = build_broadsheet(cohort.students)?;
    Ok(json!({ "key": key, "broadsheet": sheet }))
}

fn report_card(conn: &Connection, cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let key = parse_key(params, &cfg.academic)?;
    let student_id = required_str(params, "studentId")?;
    let from = optional_date(params, "attendanceFrom")?;
    let to = optional_date(params, "attendanceTo")?;

    let cohort = load_cohort(conn, &key, cfg)?;
    if !cohort.students.iter().any(|s| s.student_id == student_id) {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found in cohort".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    let records = list_records(conn, &key.class_id, from, to, None)?;
    let extras = ReportCardExtras {
        comments: load_comments(conn, &key, &student_id)?,
        attendance: Some(summarize_student(&student_id, &records)),
    };
    let ctx = GradingContext {
        scale: &cohort.scale,
        limits: &cohort.limits,
    };
    let card = build_report_card(&student_id, cohort.students, ctx, extras)?;
    Ok(json!({ "reportCard": card }))
}

fn attendance_broadsheet(conn: &Connection, _cfg: &ResultsConfig, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let subject = optional_str(params, "subject")?;
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    let roster = list_roster(conn, &class_id, false)?;
    let records = list_records(conn, &class_id, from, to, subject.as_deref())?;
    let sheet = build_attendance_broadsheet(&roster, &records);
    Ok(json!({ "classId": class_id, "attendance": sheet }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &ResultsConfig, &Value) -> Result<Value, HandlerErr> =
        match req.method.as_str() {
            "reports.broadsheet" => broadsheet,
            "reports.reportCard" => report_card,
            "reports.attendanceBroadsheet" => attendance_broadsheet,
            _ => return None,
        };
    Some(with_config(state, req, |conn, cfg| handler(conn, cfg, &req.params)))
}
