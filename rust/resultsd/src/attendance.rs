use crate::cohort::require_class;
use crate::db::now_stamp;
use crate::error::{Result, ResultsError};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMark {
    pub student_id: String,
    pub status: AttendanceStatus,
}

/// Immutable once stored; a correction is a new record naming the one it
/// supersedes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    #[serde(skip)]
    pub seq: i64,
    pub class_id: String,
    pub date: NaiveDate,
    pub subject: String,
    pub taken_by: Option<String>,
    pub supersedes: Option<String>,
    pub created_at: String,
    pub students: Vec<AttendanceMark>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendanceRecord {
    pub class_id: String,
    pub date: String,
    pub subject: String,
    #[serde(default)]
    pub taken_by: Option<String>,
    #[serde(default)]
    pub supersedes: Option<String>,
    pub students: Vec<AttendanceMark>,
}

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ResultsError::validation(format!("{} must be YYYY-MM-DD", field)))
}

/// Drops superseded records and keeps only the newest record per
/// date and subject. Output is ordered by date, subject.
pub fn effective_records(records: &[AttendanceRecord]) -> Vec<&AttendanceRecord> {
    let superseded: HashSet<&str> = records
        .iter()
        .filter_map(|r| r.supersedes.as_deref())
        .collect();
    let mut latest: HashMap<(NaiveDate, &str), &AttendanceRecord> = HashMap::new();
    for r in records {
        if superseded.contains(r.id.as_str()) {
            continue;
        }
        latest
            .entry((r.date, r.subject.as_str()))
            .and_modify(|cur| {
                if r.seq > cur.seq {
                    *cur = r;
                }
            })
            .or_insert(r);
    }
    let mut out: Vec<&AttendanceRecord> = latest.into_values().collect();
    out.sort_by(|a, b| (a.date, &a.subject).cmp(&(b.date, &b.subject)));
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub recorded: usize,
    pub percentage: f64,
}

impl AttendanceSummary {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
        self.recorded += 1;
        self.percentage = if self.recorded > 0 {
            100.0 * ((self.present + self.late) as f64) / (self.recorded as f64)
        } else {
            0.0
        };
    }
}

pub fn summarize_student(student_id: &str, records: &[AttendanceRecord]) -> AttendanceSummary {
    let mut summary = AttendanceSummary::default();
    for r in effective_records(records) {
        if let Some(m) = r.students.iter().find(|m| m.student_id == student_id) {
            summary.add(m.status);
        }
    }
    summary
}

pub fn insert_record(conn: &Connection, input: &NewAttendanceRecord) -> Result<AttendanceRecord> {
    require_class(conn, &input.class_id)?;
    let date = parse_date(&input.date, "date")?;
    let subject = input.subject.trim();
    if subject.is_empty() {
        return Err(ResultsError::validation("subject must not be empty"));
    }
    if input.students.is_empty() {
        return Err(ResultsError::validation("students must not be empty"));
    }
    let mut seen = HashSet::new();
    for m in &input.students {
        if !seen.insert(m.student_id.as_str()) {
            return Err(ResultsError::validation(format!(
                "student {} listed twice",
                m.student_id
            )));
        }
    }

    if let Some(prev_id) = &input.supersedes {
        let prev: Option<(String, String, String)> = conn
            .query_row(
                "SELECT class_id, date, subject FROM attendance_records WHERE id = ?",
                [prev_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((prev_class, prev_date, prev_subject)) = prev else {
            return Err(ResultsError::not_found(format!(
                "attendance record not found: {}",
                prev_id
            )));
        };
        if prev_class != input.class_id
            || prev_date != date.to_string()
            || prev_subject != subject
        {
            return Err(ResultsError::integrity(
                "a correction must keep the class, date and subject of the record it supersedes",
            ));
        }
    }

    let tx = conn.unchecked_transaction()?;
    for m in &input.students {
        let known = tx
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                (&input.class_id, &m.student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !known {
            return Err(ResultsError::not_found(format!(
                "student {} not found in class {}",
                m.student_id, input.class_id
            )));
        }
    }
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM attendance_records",
        [],
        |r| r.get(0),
    )?;
    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        seq,
        class_id: input.class_id.clone(),
        date,
        subject: subject.to_string(),
        taken_by: input
            .taken_by
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        supersedes: input.supersedes.clone(),
        created_at: now_stamp(),
        students: input.students.clone(),
    };
    tx.execute(
        "INSERT INTO attendance_records(id, seq, class_id, date, subject, taken_by, supersedes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            record.seq,
            &record.class_id,
            record.date.to_string(),
            &record.subject,
            record.taken_by.as_deref(),
            record.supersedes.as_deref(),
            &record.created_at,
        ),
    )?;
    for m in &record.students {
        tx.execute(
            "INSERT INTO attendance_entries(record_id, student_id, status) VALUES(?, ?, ?)",
            (&record.id, &m.student_id, m.status.as_str()),
        )?;
    }
    tx.commit()?;
    Ok(record)
}

/// Every stored record for a class, optionally limited to an inclusive date
/// range and a subject, in creation order.
pub fn list_records(
    conn: &Connection,
    class_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    subject: Option<&str>,
) -> Result<Vec<AttendanceRecord>> {
    require_class(conn, class_id)?;
    let mut sql = String::from(
        "SELECT id, seq, class_id, date, subject, taken_by, supersedes, created_at
         FROM attendance_records
         WHERE class_id = ?",
    );
    let mut bind: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(d) = from {
        sql.push_str(" AND date >= ?");
        bind.push(Value::Text(d.to_string()));
    }
    if let Some(d) = to {
        sql.push_str(" AND date <= ?");
        bind.push(Value::Text(d.to_string()));
    }
    if let Some(s) = subject {
        sql.push_str(" AND subject = ?");
        bind.push(Value::Text(s.trim().to_string()));
    }
    sql.push_str(" ORDER BY seq");

    let mut stmt = conn.prepare(&sql)?;
    let headers = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, String>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries_stmt = conn.prepare(
        "SELECT e.student_id, e.status
         FROM attendance_entries e
         JOIN students s ON s.id = e.student_id
         WHERE e.record_id = ?
         ORDER BY s.sort_order",
    )?;
    let mut out = Vec::with_capacity(headers.len());
    for (id, seq, class_id, date_raw, subject, taken_by, supersedes, created_at) in headers {
        let date = parse_date(&date_raw, "stored date")
            .map_err(|_| ResultsError::integrity(format!("record {} has bad date", id)))?;
        let raw_marks = entries_stmt
            .query_map([&id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut students = Vec::with_capacity(raw_marks.len());
        for (student_id, status_raw) in raw_marks {
            let status = AttendanceStatus::parse(&status_raw).ok_or_else(|| {
                ResultsError::integrity(format!("record {} has bad status {}", id, status_raw))
            })?;
            students.push(AttendanceMark { student_id, status });
        }
        out.push(AttendanceRecord {
            id,
            seq,
            class_id,
            date,
            subject,
            taken_by,
            supersedes,
            created_at,
            students,
        });
    }
    Ok(out)
}
