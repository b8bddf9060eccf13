use crate::calc::{build_student_result, rank_cohort, ComponentLimits, GradingContext};
use crate::config::ResultsConfig;
use crate::entries::load_entries;
use crate::error::{Result, ResultsError};
use crate::grading::GradingScale;
use crate::model::{
    CohortSnapshot, ResultSet, ResultSetKey, ResultStatus, RosterStudent, StudentResult,
};
use crate::store::{ResultSetFilter, ResultSetStore};
use crate::workflow::{next_status, ApprovalWorkflow, WorkflowAction};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

pub fn require_class(conn: &Connection, class_id: &str) -> Result<()> {
    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(ResultsError::not_found(format!("class not found: {}", class_id)));
    }
    Ok(())
}

/// Class roster in roster order, which is also the ranking tie-break order.
pub fn list_roster(
    conn: &Connection,
    class_id: &str,
    include_inactive: bool,
) -> Result<Vec<RosterStudent>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, admission_no, sort_order, active
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let students = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(RosterStudent {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                admission_no: r.get(3)?,
                sort_order: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(students
        .into_iter()
        .filter(|s| include_inactive || s.active)
        .collect())
}

/// A ranked cohort and the grading settings it was computed with.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub set: ResultSet,
    pub scale: GradingScale,
    pub limits: ComponentLimits,
    pub students: Vec<StudentResult>,
}

fn compute(
    conn: &Connection,
    key: &ResultSetKey,
    roster: &[RosterStudent],
    ctx: GradingContext<'_>,
) -> Result<Vec<StudentResult>> {
    let mut entries = load_entries(conn, key)?;
    let mut results = Vec::with_capacity(roster.len());
    for student in roster {
        let student_entries = entries.remove(&student.id).unwrap_or_default();
        let result = build_student_result(student, key, &student_entries, ctx).map_err(
            |e| match e {
                // Stored entries were valid when written; limits changed since.
                ResultsError::Validation(msg) => ResultsError::integrity(format!(
                    "stored entry for {} no longer valid: {}",
                    student.display_name, msg
                )),
                other => other,
            },
        )?;
        results.push(result);
    }
    if !entries.is_empty() {
        debug!(
            key = %key,
            skipped = entries.len(),
            "entries for students outside the cohort left out"
        );
    }
    Ok(rank_cohort(results))
}

/// Computes and ranks the cohort identified by `key`, whatever the workflow
/// status of its set. Drafts use the active roster and the live settings;
/// locked and approved sets use the snapshot taken when they were submitted.
pub fn load_cohort(conn: &Connection, key: &ResultSetKey, cfg: &ResultsConfig) -> Result<Cohort> {
    require_class(conn, &key.class_id)?;
    let set = ApprovalWorkflow::new(conn).get(key)?;
    let (scale, limits, roster) = match &set.snapshot {
        Some(snap) => (snap.scale.clone(), snap.limits, snap.roster.clone()),
        None => (
            cfg.grading.clone(),
            cfg.components,
            list_roster(conn, &key.class_id, false)?,
        ),
    };
    let ctx = GradingContext {
        scale: &scale,
        limits: &limits,
    };
    let students = compute(conn, key, &roster, ctx)?;
    Ok(Cohort {
        set,
        scale,
        limits,
        students,
    })
}

/// Snapshot for submitting `key`: the active roster and the live settings,
/// once every stored entry has been checked against them.
pub fn freeze_cohort(
    conn: &Connection,
    key: &ResultSetKey,
    cfg: &ResultsConfig,
) -> Result<CohortSnapshot> {
    require_class(conn, &key.class_id)?;
    let set = ApprovalWorkflow::new(conn).get(key)?;
    next_status(set.status, WorkflowAction::Submit)?;
    let roster = list_roster(conn, &key.class_id, false)?;
    compute(conn, key, &roster, cfg.grading_context())?;
    Ok(CohortSnapshot {
        scale: cfg.grading.clone(),
        limits: cfg.components,
        roster,
    })
}

fn frozen_sets(conn: &Connection, class_id: &str) -> Result<Vec<ResultSet>> {
    let sets = conn.list(&ResultSetFilter {
        class_id: Some(class_id.to_string()),
        ..Default::default()
    })?;
    Ok(sets
        .into_iter()
        .filter(|s| s.status != ResultStatus::Draft)
        .collect())
}

fn has_set_rows(conn: &Connection, key: &ResultSetKey, student_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subject_scores
             WHERE class_id = ?1 AND term = ?2 AND session = ?3 AND result_type = ?4
               AND student_id = ?5
             UNION ALL
             SELECT 1 FROM result_comments
             WHERE class_id = ?1 AND term = ?2 AND session = ?3 AND result_type = ?4
               AND student_id = ?5
             LIMIT 1",
            (
                &key.class_id,
                &key.term,
                &key.session,
                key.result_type.as_str(),
                student_id,
            ),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Fails while a locked or approved set of the class still holds the student,
/// either on its snapshot roster or through stored entries or comments.
pub fn ensure_student_removable(conn: &Connection, class_id: &str, student_id: &str) -> Result<()> {
    for set in frozen_sets(conn, class_id)? {
        let on_roster = set
            .snapshot
            .as_ref()
            .map(|snap| snap.includes(student_id))
            .unwrap_or(false);
        if on_roster || has_set_rows(conn, &set.key, student_id)? {
            return Err(ResultsError::transition(WorkflowAction::Edit, set.status));
        }
    }
    Ok(())
}

/// Fails while the class has any locked or approved set.
pub fn ensure_class_removable(conn: &Connection, class_id: &str) -> Result<()> {
    match frozen_sets(conn, class_id)?.first() {
        Some(set) => Err(ResultsError::transition(WorkflowAction::Edit, set.status)),
        None => Ok(()),
    }
}

/// An approved set whose cohort could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFailure {
    pub key: ResultSetKey,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedResults {
    pub results: Vec<StudentResult>,
    pub failures: Vec<SetFailure>,
}

/// Results visible to students and parents: approved sets only. A set that
/// fails to compute is reported in `failures` and does not hide the others.
pub fn load_approved_results(
    conn: &Connection,
    filter: &ResultSetFilter,
    student_id: Option<&str>,
    cfg: &ResultsConfig,
) -> Result<ApprovedResults> {
    let filter = ResultSetFilter {
        status: Some(ResultStatus::Approved),
        ..filter.clone()
    };
    let mut out = ApprovedResults::default();
    for set in conn.list(&filter)? {
        if !set.is_published() {
            continue;
        }
        match load_cohort(conn, &set.key, cfg) {
            Ok(cohort) => out.results.extend(
                cohort
                    .students
                    .into_iter()
                    .filter(|r| student_id.map(|id| r.student_id == id).unwrap_or(true)),
            ),
            Err(e) => {
                warn!(key = %set.key, error = %e, "approved set could not be computed");
                out.failures.push(SetFailure {
                    key: set.key,
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::tests::{entry, seeded_conn, term_key};
    use crate::entries::{upsert_entries, EntryInput};
    use crate::model::{ResultType, ScoreComponents};

    fn seed_scores(conn: &Connection, cfg: &ResultsConfig) {
        ApprovalWorkflow::new(conn).create(term_key()).expect("create");
        upsert_entries(
            conn,
            &term_key(),
            &[
                entry("s1", "Maths", 40.0),
                entry("s1", "English", 50.0),
                entry("s2", "Maths", 60.0),
                entry("s2", "English", 50.0),
                entry("s3", "Maths", 45.0),
                entry("s3", "English", 45.0),
            ],
            cfg,
        )
        .expect("entries");
    }

    fn submit_and_approve(conn: &Connection, key: &ResultSetKey, cfg: &ResultsConfig) {
        let wf = ApprovalWorkflow::new(conn);
        let snapshot = freeze_cohort(conn, key, cfg).expect("freeze");
        wf.submit(key, "teacher", snapshot).expect("submit");
        wf.approve(key, "principal").expect("approve");
    }

    #[test]
    fn cohort_is_ranked_with_roster_tie_break() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        let cohort = load_cohort(&conn, &term_key(), &cfg).expect("cohort").students;
        let ids: Vec<&str> = cohort.iter().map(|r| r.student_id.as_str()).collect();
        // s1 and s3 both average 45; s1 comes first on the roster.
        assert_eq!(ids, vec!["s2", "s1", "s3"]);
        assert_eq!(cohort[0].overall_position, Some(1));
        assert_eq!(cohort[0].total_score, 110.0);
        assert_eq!(cohort[2].overall_position, Some(3));
    }

    #[test]
    fn inactive_students_are_left_out() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        conn.execute("UPDATE students SET active = 0 WHERE id = 's2'", [])
            .expect("deactivate");
        let cohort = load_cohort(&conn, &term_key(), &cfg).expect("cohort").students;
        assert_eq!(cohort.len(), 2);
        assert!(cohort.iter().all(|r| r.student_id != "s2"));
    }

    #[test]
    fn missing_set_is_not_found() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        assert!(matches!(
            load_cohort(&conn, &term_key(), &cfg),
            Err(ResultsError::NotFound(_))
        ));
    }

    #[test]
    fn approved_query_hides_unapproved_sets() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        let wf = ApprovalWorkflow::new(&conn);

        let none = load_approved_results(&conn, &ResultSetFilter::default(), None, &cfg)
            .expect("draft");
        assert!(none.results.is_empty());

        let snapshot = freeze_cohort(&conn, &term_key(), &cfg).expect("freeze");
        wf.submit(&term_key(), "teacher", snapshot).expect("submit");
        let still_none =
            load_approved_results(&conn, &ResultSetFilter::default(), None, &cfg).expect("locked");
        assert!(still_none.results.is_empty());

        wf.approve(&term_key(), "principal").expect("approve");
        let mine =
            load_approved_results(&conn, &ResultSetFilter::default(), Some("s3"), &cfg)
                .expect("approved");
        assert_eq!(mine.results.len(), 1);
        assert_eq!(mine.results[0].student_id, "s3");
        assert_eq!(mine.results[0].overall_position, Some(3));
        assert!(mine.failures.is_empty());
    }

    #[test]
    fn lowered_limits_surface_as_integrity_error() {
        let conn = seeded_conn();
        let mut cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        cfg.components.exam_score = 30.0;
        assert!(matches!(
            load_cohort(&conn, &term_key(), &cfg),
            Err(ResultsError::DataIntegrity(_))
        ));
        assert!(matches!(
            freeze_cohort(&conn, &term_key(), &cfg),
            Err(ResultsError::DataIntegrity(_))
        ));
    }

    #[test]
    fn approved_cohort_ignores_later_roster_and_settings_changes() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        submit_and_approve(&conn, &term_key(), &cfg);
        let before = load_cohort(&conn, &term_key(), &cfg).expect("before").students;

        conn.execute("UPDATE students SET active = 0 WHERE id = 's2'", [])
            .expect("deactivate");
        conn.execute("UPDATE students SET sort_order = 9 WHERE id = 's1'", [])
            .expect("reorder");
        conn.execute(
            "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order)
             VALUES('s4', 'JSS1', 'Adamu', 'Zainab', 1, 3)",
            [],
        )
        .expect("new student");
        let mut changed = ResultsConfig::default();
        changed.components.exam_score = 30.0;
        changed.grading.bands[0].min = 95.0;

        let after = load_cohort(&conn, &term_key(), &changed).expect("after");
        assert_eq!(after.students, before);
        assert_eq!(after.limits, cfg.components);
        assert_eq!(after.scale, cfg.grading);
    }

    #[test]
    fn students_of_frozen_sets_cannot_be_removed() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        ensure_student_removable(&conn, "JSS1", "s1").expect("draft only");
        ensure_class_removable(&conn, "JSS1").expect("draft only");

        submit_and_approve(&conn, &term_key(), &cfg);
        match ensure_student_removable(&conn, "JSS1", "s1") {
            Err(ResultsError::InvalidStateTransition { action, current }) => {
                assert_eq!(action, "edit");
                assert_eq!(current, "approved");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ensure_class_removable(&conn, "JSS1").is_err());

        conn.execute(
            "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order)
             VALUES('s4', 'JSS1', 'Adamu', 'Zainab', 1, 3)",
            [],
        )
        .expect("late admission");
        ensure_student_removable(&conn, "JSS1", "s4").expect("not part of the approved set");
    }

    #[test]
    fn one_broken_approved_set_does_not_hide_the_rest() {
        let conn = seeded_conn();
        let cfg = ResultsConfig::default();
        seed_scores(&conn, &cfg);
        submit_and_approve(&conn, &term_key(), &cfg);

        // An approved set stored without a snapshot falls back to live limits.
        let ca = ResultSetKey::new("JSS1", "First Term", "2024/2025", ResultType::Ca);
        ApprovalWorkflow::new(&conn).create(ca.clone()).expect("ca");
        let quiz = EntryInput {
            student_id: "s1".into(),
            subject_name: "Maths".into(),
            components: ScoreComponents {
                quiz_practical: Some(9.0),
                ..Default::default()
            },
        };
        upsert_entries(&conn, &ca, &[quiz], &cfg).expect("ca entry");
        conn.execute(
            "UPDATE result_sets SET status = 'approved' WHERE result_type = 'CA'",
            [],
        )
        .expect("approve without snapshot");

        let mut lowered = ResultsConfig::default();
        lowered.components.quiz_practical = 5.0;
        let out = load_approved_results(&conn, &ResultSetFilter::default(), None, &lowered)
            .expect("approved");
        assert_eq!(out.results.len(), 3);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].key, ca);
        assert_eq!(out.failures[0].code, "data_integrity");
    }
}
