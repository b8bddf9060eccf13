use crate::calc::{normalize_subject_name, subject_score};
use crate::config::ResultsConfig;
use crate::db::now_stamp;
use crate::error::{Result, ResultsError};
use crate::model::{ResultSetKey, ResultStatus, ScoreComponents, SubjectScore};
use crate::workflow::{ApprovalWorkflow, WorkflowAction};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One raw score entry as received from the entry form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntryInput {
    pub student_id: String,
    pub subject_name: String,
    pub components: ScoreComponents,
}

fn student_in_class(conn: &Connection, class_id: &str, student_id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (class_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Spelling already used in the set for `name`, compared without case.
fn canonical_subject(conn: &Connection, key: &ResultSetKey, name: &str) -> Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT subject_name FROM subject_scores
             WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?
               AND subject_name = ? COLLATE NOCASE
             ORDER BY id
             LIMIT 1",
            (
                &key.class_id,
                &key.term,
                &key.session,
                key.result_type.as_str(),
                name,
            ),
            |r| r.get(0),
        )
        .optional()?;
    Ok(existing.unwrap_or_else(|| name.to_string()))
}

fn write_entry(
    conn: &Connection,
    key: &ResultSetKey,
    entry: &EntryInput,
    cfg: &ResultsConfig,
) -> Result<SubjectScore> {
    if !student_in_class(conn, &key.class_id, &entry.student_id)? {
        return Err(ResultsError::not_found(format!(
            "student {} not found in class {}",
            entry.student_id, key.class_id
        )));
    }
    let mut score = subject_score(
        &entry.subject_name,
        entry.components,
        key.result_type,
        cfg.grading_context(),
    )?;
    score.subject_name = canonical_subject(conn, key, &score.subject_name)?;
    let c = &score.components;
    conn.execute(
        "INSERT INTO subject_scores(
           class_id, term, session, result_type, student_id, subject_name,
           periodic_test, mid_term_test, quiz_practical, class_participation, exam_score,
           updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, term, session, result_type, student_id, subject_name)
         DO UPDATE SET
           periodic_test = excluded.periodic_test,
           mid_term_test = excluded.mid_term_test,
           quiz_practical = excluded.quiz_practical,
           class_participation = excluded.class_participation,
           exam_score = excluded.exam_score,
           updated_at = excluded.updated_at",
        (
            &key.class_id,
            &key.term,
            &key.session,
            key.result_type.as_str(),
            &entry.student_id,
            &score.subject_name,
            c.periodic_test,
            c.mid_term_test,
            c.quiz_practical,
            c.class_participation,
            c.exam_score,
            now_stamp(),
        ),
    )?;
    Ok(score)
}

/// Validates and stores one entry. The set must be a draft.
pub fn upsert_entry(
    conn: &Connection,
    key: &ResultSetKey,
    entry: &EntryInput,
    cfg: &ResultsConfig,
) -> Result<SubjectScore> {
    ApprovalWorkflow::new(conn).ensure_editable(key)?;
    write_entry(conn, key, entry, cfg)
}

/// Stores all entries or none of them.
pub fn upsert_entries(
    conn: &Connection,
    key: &ResultSetKey,
    entries: &[EntryInput],
    cfg: &ResultsConfig,
) -> Result<Vec<SubjectScore>> {
    ApprovalWorkflow::new(conn).ensure_editable(key)?;
    let tx = conn.unchecked_transaction()?;
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match write_entry(&tx, key, entry, cfg) {
            Ok(score) => out.push(score),
            Err(ResultsError::Validation(msg)) => {
                return Err(ResultsError::validation(format!("entries[{}]: {}", i, msg)));
            }
            Err(e) => return Err(e),
        }
    }
    tx.commit()?;
    Ok(out)
}

/// Returns whether an entry was removed.
pub fn delete_entry(
    conn: &Connection,
    key: &ResultSetKey,
    student_id: &str,
    subject_name: &str,
) -> Result<bool> {
    ApprovalWorkflow::new(conn).ensure_editable(key)?;
    let removed = conn.execute(
        "DELETE FROM subject_scores
         WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?
           AND student_id = ? AND subject_name = ? COLLATE NOCASE",
        (
            &key.class_id,
            &key.term,
            &key.session,
            key.result_type.as_str(),
            student_id,
            normalize_subject_name(subject_name),
        ),
    )?;
    Ok(removed > 0)
}

/// Raw entries of a set grouped by student, each list in entry order.
pub fn load_entries(
    conn: &Connection,
    key: &ResultSetKey,
) -> Result<HashMap<String, Vec<(String, ScoreComponents)>>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject_name, periodic_test, mid_term_test, quiz_practical,
                class_participation, exam_score
         FROM subject_scores
         WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(
            (
                &key.class_id,
                &key.term,
                &key.session,
                key.result_type.as_str(),
            ),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    ScoreComponents {
                        periodic_test: r.get(2)?,
                        mid_term_test: r.get(3)?,
                        quiz_practical: r.get(4)?,
                        class_participation: r.get(5)?,
                        exam_score: r.get(6)?,
                    },
                ))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_student: HashMap<String, Vec<(String, ScoreComponents)>> = HashMap::new();
    for (student_id, subject_name, comps) in rows {
        by_student
            .entry(student_id)
            .or_default()
            .push((subject_name, comps));
    }
    Ok(by_student)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultComments {
    pub teacher_comment: Option<String>,
    pub principal_comment: Option<String>,
}

/// Field update: `None` leaves the field, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct CommentsPatch {
    pub teacher_comment: Option<Option<String>>,
    pub principal_comment: Option<Option<String>>,
}

pub fn load_comments(
    conn: &Connection,
    key: &ResultSetKey,
    student_id: &str,
) -> Result<ResultComments> {
    let row = conn
        .query_row(
            "SELECT teacher_comment, principal_comment
             FROM result_comments
             WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?
               AND student_id = ?",
            (
                &key.class_id,
                &key.term,
                &key.session,
                key.result_type.as_str(),
                student_id,
            ),
            |r| {
                Ok(ResultComments {
                    teacher_comment: r.get(0)?,
                    principal_comment: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

/// Teacher comments follow score entry (draft only); the principal may
/// still comment while reviewing a locked set.
pub fn update_comments(
    conn: &Connection,
    key: &ResultSetKey,
    student_id: &str,
    patch: &CommentsPatch,
) -> Result<ResultComments> {
    let set = ApprovalWorkflow::new(conn).get(key)?;
    if patch.teacher_comment.is_some() && set.status != ResultStatus::Draft {
        return Err(ResultsError::transition(WorkflowAction::Edit, set.status));
    }
    if patch.principal_comment.is_some() && set.status == ResultStatus::Approved {
        return Err(ResultsError::transition(WorkflowAction::Edit, set.status));
    }
    if !student_in_class(conn, &key.class_id, student_id)? {
        return Err(ResultsError::not_found(format!(
            "student {} not found in class {}",
            student_id, key.class_id
        )));
    }

    let mut current = load_comments(conn, key, student_id)?;
    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if let Some(v) = &patch.teacher_comment {
        current.teacher_comment = clean(v);
    }
    if let Some(v) = &patch.principal_comment {
        current.principal_comment = clean(v);
    }
    conn.execute(
        "INSERT INTO result_comments(
           class_id, term, session, result_type, student_id, teacher_comment, principal_comment
         ) VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, term, session, result_type, student_id) DO UPDATE SET
           teacher_comment = excluded.teacher_comment,
           principal_comment = excluded.principal_comment",
        (
            &key.class_id,
            &key.term,
            &key.session,
            key.result_type.as_str(),
            student_id,
            current.teacher_comment.as_deref(),
            current.principal_comment.as_deref(),
        ),
    )?;
    Ok(current)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::model::{CohortSnapshot, ResultType};

    pub(crate) fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute("INSERT INTO classes(id, name) VALUES('JSS1', 'JSS 1')", [])
            .expect("class");
        for (i, (id, last, first)) in [
            ("s1", "Okafor", "Ada"),
            ("s2", "Bello", "Musa"),
            ("s3", "Eze", "Chidi"),
        ]
        .iter()
        .enumerate()
        {
            conn.execute(
                "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order)
                 VALUES(?, 'JSS1', ?, ?, 1, ?)",
                (id, last, first, i as i64),
            )
            .expect("student");
        }
        conn
    }

    pub(crate) fn term_key() -> ResultSetKey {
        ResultSetKey::new("JSS1", "First Term", "2024/2025", ResultType::Term)
    }

    pub(crate) fn entry(student_id: &str, subject: &str, exam: f64) -> EntryInput {
        EntryInput {
            student_id: student_id.into(),
            subject_name: subject.into(),
            components: ScoreComponents {
                exam_score: Some(exam),
                ..Default::default()
            },
        }
    }

    #[test]
    fn upsert_recomputes_and_overwrites() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        ApprovalWorkflow::new(&conn).create(term_key()).expect("create");

        let first = upsert_entry(&conn, &term_key(), &entry("s1", "Maths", 40.0), &cfg)
            .expect("first");
        assert_eq!(first.total, 40.0);
        let second = upsert_entry(&conn, &term_key(), &entry("s1", " Maths ", 55.0), &cfg)
            .expect("second");
        assert_eq!(second.total, 55.0);

        let entries = load_entries(&conn, &term_key()).expect("load");
        assert_eq!(entries["s1"].len(), 1);
        assert_eq!(entries["s1"][0].1.exam_score, Some(55.0));
    }

    #[test]
    fn bulk_upsert_is_all_or_nothing() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        ApprovalWorkflow::new(&conn).create(term_key()).expect("create");
        let entries = vec![entry("s1", "Maths", 50.0), entry("s2", "Maths", 61.0)];
        let e = upsert_entries(&conn, &term_key(), &entries, &cfg).expect_err("over max");
        assert!(e.to_string().starts_with("entries[1]"));
        assert!(load_entries(&conn, &term_key()).expect("load").is_empty());
    }

    #[test]
    fn locked_set_rejects_writes() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        let wf = ApprovalWorkflow::new(&conn);
        wf.create(term_key()).expect("create");
        upsert_entry(&conn, &term_key(), &entry("s1", "Maths", 50.0), &cfg).expect("entry");
        wf.submit(&term_key(), "teacher", CohortSnapshot::default())
            .expect("submit");

        assert!(matches!(
            upsert_entry(&conn, &term_key(), &entry("s1", "Maths", 20.0), &cfg),
            Err(ResultsError::InvalidStateTransition { .. })
        ));
        assert!(delete_entry(&conn, &term_key(), "s1", "Maths").is_err());
        let entries = load_entries(&conn, &term_key()).expect("load");
        assert_eq!(entries["s1"][0].1.exam_score, Some(50.0));
    }

    #[test]
    fn unknown_student_is_not_found() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        ApprovalWorkflow::new(&conn).create(term_key()).expect("create");
        assert!(matches!(
            upsert_entry(&conn, &term_key(), &entry("nobody", "Maths", 50.0), &cfg),
            Err(ResultsError::NotFound(_))
        ));
    }

    #[test]
    fn principal_may_comment_on_locked_set_but_teacher_may_not() {
        let conn = seeded_conn();
        let wf = ApprovalWorkflow::new(&conn);
        wf.create(term_key()).expect("create");
        let teacher = CommentsPatch {
            teacher_comment: Some(Some("Hardworking".into())),
            ..Default::default()
        };
        update_comments(&conn, &term_key(), "s1", &teacher).expect("teacher draft");
        wf.submit(&term_key(), "teacher", CohortSnapshot::default())
            .expect("submit");

        assert!(update_comments(&conn, &term_key(), "s1", &teacher).is_err());
        let principal = CommentsPatch {
            principal_comment: Some(Some("Keep it up".into())),
            ..Default::default()
        };
        let saved = update_comments(&conn, &term_key(), "s1", &principal).expect("principal");
        assert_eq!(saved.teacher_comment.as_deref(), Some("Hardworking"));
        assert_eq!(saved.principal_comment.as_deref(), Some("Keep it up"));
    }

    #[test]
    fn subject_spelling_follows_the_first_entry_of_the_set() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        ApprovalWorkflow::new(&conn).create(term_key()).expect("create");
        upsert_entry(&conn, &term_key(), &entry("s1", "Further Maths", 40.0), &cfg)
            .expect("first");
        let same = upsert_entry(&conn, &term_key(), &entry("s1", "further  MATHS", 45.0), &cfg)
            .expect("same subject");
        assert_eq!(same.subject_name, "Further Maths");
        let other = upsert_entry(&conn, &term_key(), &entry("s2", "FURTHER maths", 50.0), &cfg)
            .expect("other student");
        assert_eq!(other.subject_name, "Further Maths");

        let entries = load_entries(&conn, &term_key()).expect("load");
        assert_eq!(entries["s1"].len(), 1);
        assert_eq!(entries["s1"][0].1.exam_score, Some(45.0));
        assert_eq!(entries["s2"][0].0, "Further Maths");

        assert!(delete_entry(&conn, &term_key(), "s1", "FURTHER MATHS").expect("delete"));
        assert!(!load_entries(&conn, &term_key()).expect("load").contains_key("s1"));
    }

    #[test]
    fn entry_input_rejects_unknown_fields() {
        let typo = serde_json::json!({
            "studentId": "s1",
            "subjectName": "Maths",
            "components": { "exam": 55 }
        });
        assert!(serde_json::from_value::<EntryInput>(typo).is_err());
        let stray = serde_json::json!({
            "studentId": "s1",
            "subjectName": "Maths",
            "components": { "examScore": 55 },
            "grade": "A"
        });
        assert!(serde_json::from_value::<EntryInput>(stray).is_err());
        let missing = serde_json::json!({ "studentId": "s1", "subjectName": "Maths" });
        assert!(serde_json::from_value::<EntryInput>(missing).is_err());
    }
}
