use crate::attendance::parse_date;
use crate::db::now_stamp;
use crate::error::{Result, ResultsError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisciplineStatus {
    Pending,
    Reviewed,
    Resolved,
}

impl DisciplineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "reviewed" => Some(Self::Reviewed),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Reviewed)
                | (Self::Pending, Self::Resolved)
                | (Self::Reviewed, Self::Resolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExeatStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    fn can_move_to(self, next: Self) -> bool {
        self == Self::Pending && next != Self::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisciplineCase {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub title: String,
    pub description: String,
    pub reported_by: String,
    pub reported_date: String,
    pub status: DisciplineStatus,
    pub resolution: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDisciplineCase {
    pub class_id: String,
    pub student_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reported_by: String,
    #[serde(default)]
    pub reported_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExeatApplication {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub reason: String,
    pub departure_date: String,
    pub return_date: String,
    pub requested_by: String,
    pub status: ExeatStatus,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExeatApplication {
    pub class_id: String,
    pub student_id: String,
    pub reason: String,
    pub departure_date: String,
    pub return_date: String,
    pub requested_by: String,
}

fn non_blank(v: &str, field: &str) -> Result<String> {
    let t = v.trim();
    if t.is_empty() {
        return Err(ResultsError::validation(format!("{} must not be empty", field)));
    }
    Ok(t.to_string())
}

fn clean_note(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn require_student(conn: &Connection, class_id: &str, student_id: &str) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (class_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !found {
        return Err(ResultsError::not_found(format!(
            "student {} not found in class {}",
            student_id, class_id
        )));
    }
    Ok(())
}

fn list_where(class_id: Option<&str>, student_id: Option<&str>) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut bind = Vec::new();
    if let Some(c) = class_id {
        clauses.push("class_id = ?");
        bind.push(Value::Text(c.to_string()));
    }
    if let Some(s) = student_id {
        clauses.push("student_id = ?");
        bind.push(Value::Text(s.to_string()));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, bind)
}

pub fn create_discipline_case(conn: &Connection, input: &NewDisciplineCase) -> Result<DisciplineCase> {
    require_student(conn, &input.class_id, &input.student_id)?;
    let reported_date = match input.reported_date.as_deref() {
        Some(d) => parse_date(d, "reportedDate")?.to_string(),
        None => chrono::Local::now().date_naive().to_string(),
    };
    let case = DisciplineCase {
        id: Uuid::new_v4().to_string(),
        class_id: input.class_id.clone(),
        student_id: input.student_id.clone(),
        title: non_blank(&input.title, "title")?,
        description: input.description.trim().to_string(),
        reported_by: non_blank(&input.reported_by, "reportedBy")?,
        reported_date,
        status: DisciplineStatus::Pending,
        resolution: None,
        updated_at: Some(now_stamp()),
    };
    conn.execute(
        "INSERT INTO discipline_cases(
           id, class_id, student_id, title, description, reported_by, reported_date,
           status, resolution, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        (
            &case.id,
            &case.class_id,
            &case.student_id,
            &case.title,
            &case.description,
            &case.reported_by,
            &case.reported_date,
            case.status.as_str(),
            case.updated_at.as_deref(),
        ),
    )?;
    Ok(case)
}

fn discipline_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(DisciplineCase, String)> {
    let status_raw: String = r.get(7)?;
    Ok((
        DisciplineCase {
            id: r.get(0)?,
            class_id: r.get(1)?,
            student_id: r.get(2)?,
            title: r.get(3)?,
            description: r.get(4)?,
            reported_by: r.get(5)?,
            reported_date: r.get(6)?,
            status: DisciplineStatus::Pending,
            resolution: r.get(8)?,
            updated_at: r.get(9)?,
        },
        status_raw,
    ))
}

fn finish_discipline((mut case, status_raw): (DisciplineCase, String)) -> Result<DisciplineCase> {
    case.status = DisciplineStatus::parse(&status_raw).ok_or_else(|| {
        ResultsError::integrity(format!("case {} has unknown status {}", case.id, status_raw))
    })?;
    Ok(case)
}

const DISCIPLINE_COLUMNS: &str = "id, class_id, student_id, title, description, reported_by,
    reported_date, status, resolution, updated_at";

pub fn get_discipline_case(conn: &Connection, id: &str) -> Result<DisciplineCase> {
    let sql = format!("SELECT {} FROM discipline_cases WHERE id = ?", DISCIPLINE_COLUMNS);
    let row = conn
        .query_row(&sql, [id], discipline_from_row)
        .optional()?
        .ok_or_else(|| ResultsError::not_found(format!("discipline case not found: {}", id)))?;
    finish_discipline(row)
}

pub fn list_discipline_cases(
    conn: &Connection,
    class_id: Option<&str>,
    student_id: Option<&str>,
) -> Result<Vec<DisciplineCase>> {
    let (filter, bind) = list_where(class_id, student_id);
    let sql = format!(
        "SELECT {} FROM discipline_cases{} ORDER BY reported_date, id",
        DISCIPLINE_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), discipline_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_discipline).collect()
}

/// Moves a case forward; `note` becomes the resolution when resolving.
pub fn set_discipline_status(
    conn: &Connection,
    id: &str,
    next: DisciplineStatus,
    note: Option<&str>,
) -> Result<DisciplineCase> {
    let mut case = get_discipline_case(conn, id)?;
    if !case.status.can_move_to(next) {
        return Err(ResultsError::transition(
            format!("mark {}", next.as_str()),
            case.status.as_str(),
        ));
    }
    case.status = next;
    if next == DisciplineStatus::Resolved {
        case.resolution = clean_note(note);
    }
    case.updated_at = Some(now_stamp());
    conn.execute(
        "UPDATE discipline_cases SET status = ?, resolution = ?, updated_at = ? WHERE id = ?",
        (
            case.status.as_str(),
            case.resolution.as_deref(),
            case.updated_at.as_deref(),
            &case.id,
        ),
    )?;
    Ok(case)
}

pub fn create_exeat(conn: &Connection, input: &NewExeatApplication) -> Result<ExeatApplication> {
    require_student(conn, &input.class_id, &input.student_id)?;
    let departure = parse_date(&input.departure_date, "departureDate")?;
    let ret = parse_date(&input.return_date, "returnDate")?;
    if ret < departure {
        return Err(ResultsError::validation(
            "returnDate must not be before departureDate",
        ));
    }
    let app = ExeatApplication {
        id: Uuid::new_v4().to_string(),
        class_id: input.class_id.clone(),
        student_id: input.student_id.clone(),
        reason: non_blank(&input.reason, "reason")?,
        departure_date: departure.to_string(),
        return_date: ret.to_string(),
        requested_by: non_blank(&input.requested_by, "requestedBy")?,
        status: ExeatStatus::Pending,
        decided_by: None,
        decision_note: None,
        updated_at: Some(now_stamp()),
    };
    conn.execute(
        "INSERT INTO exeat_applications(
           id, class_id, student_id, reason, departure_date, return_date, requested_by,
           status, decided_by, decision_note, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)",
        (
            &app.id,
            &app.class_id,
            &app.student_id,
            &app.reason,
            &app.departure_date,
            &app.return_date,
            &app.requested_by,
            app.status.as_str(),
            app.updated_at.as_deref(),
        ),
    )?;
    Ok(app)
}

const EXEAT_COLUMNS: &str = "id, class_id, student_id, reason, departure_date, return_date,
    requested_by, status, decided_by, decision_note, updated_at";

fn exeat_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(ExeatApplication, String)> {
    let status_raw: String = r.get(7)?;
    Ok((
        ExeatApplication {
            id: r.get(0)?,
            class_id: r.get(1)?,
            student_id: r.get(2)?,
            reason: r.get(3)?,
            departure_date: r.get(4)?,
            return_date: r.get(5)?,
            requested_by: r.get(6)?,
            status: ExeatStatus::Pending,
            decided_by: r.get(8)?,
            decision_note: r.get(9)?,
            updated_at: r.get(10)?,
        },
        status_raw,
    ))
}

fn finish_exeat((mut app, status_raw): (ExeatApplication, String)) -> Result<ExeatApplication> {
    app.status = ExeatStatus::parse(&status_raw).ok_or_else(|| {
        ResultsError::integrity(format!("exeat {} has unknown status {}", app.id, status_raw))
    })?;
    Ok(app)
}

pub fn get_exeat(conn: &Connection, id: &str) -> Result<ExeatApplication> {
    let sql = format!("SELECT {} FROM exeat_applications WHERE id = ?", EXEAT_COLUMNS);
    let row = conn
        .query_row(&sql, [id], exeat_from_row)
        .optional()?
        .ok_or_else(|| ResultsError::not_found(format!("exeat application not found: {}", id)))?;
    finish_exeat(row)
}

pub fn list_exeats(
    conn: &Connection,
    class_id: Option<&str>,
    student_id: Option<&str>,
) -> Result<Vec<ExeatApplication>> {
    let (filter, bind) = list_where(class_id, student_id);
    let sql = format!(
        "SELECT {} FROM exeat_applications{} ORDER BY departure_date, id",
        EXEAT_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), exeat_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_exeat).collect()
}

pub fn decide_exeat(
    conn: &Connection,
    id: &str,
    next: ExeatStatus,
    actor: &str,
    note: Option<&str>,
) -> Result<ExeatApplication> {
    let mut app = get_exeat(conn, id)?;
    if !app.status.can_move_to(next) {
        return Err(ResultsError::transition(
            format!("mark {}", next.as_str()),
            app.status.as_str(),
        ));
    }
    app.status = next;
    app.decided_by = Some(non_blank(actor, "actor")?);
    app.decision_note = clean_note(note);
    app.updated_at = Some(now_stamp());
    conn.execute(
        "UPDATE exeat_applications
         SET status = ?, decided_by = ?, decision_note = ?, updated_at = ?
         WHERE id = ?",
        (
            app.status.as_str(),
            app.decided_by.as_deref(),
            app.decision_note.as_deref(),
            app.updated_at.as_deref(),
            &app.id,
        ),
    )?;
    Ok(app)
}
