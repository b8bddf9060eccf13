//! Read-only views composed from an already computed cohort.
//!
//! Nothing here touches the database; handlers load the cohort, comments and
//! attendance records and pass them in.

use crate::attendance::{
    effective_records, AttendanceRecord, AttendanceStatus, AttendanceSummary,
};
use crate::calc::{
    check_single_cohort, compute_student_grade, compute_student_totals, rank_cohort,
    GradingContext,
};
use crate::entries::ResultComments;
use crate::error::{Result, ResultsError};
use crate::model::{Component, ResultSetKey, RosterStudent, ScoreComponents, StudentResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadsheetRow {
    pub student_id: String,
    pub student_name: String,
    pub admission_no: Option<String>,
    /// One cell per broadsheet subject column; `None` when the student has no
    /// entry for that subject.
    pub subject_totals: Vec<Option<f64>>,
    pub total_score: f64,
    pub overall_average: f64,
    pub position: Option<usize>,
    pub grade: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAverages {
    pub subjects: Vec<f64>,
    pub total_score: f64,
    pub overall_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadsheet {
    pub key: Option<ResultSetKey>,
    pub subjects: Vec<String>,
    pub rows: Vec<BroadsheetRow>,
    pub class_averages: ClassAverages,
    pub class_size: usize,
}

fn subject_columns(students: &[StudentResult]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in students {
        for sub in &s.subjects {
            if !out.iter().any(|n| n == &sub.subject_name) {
                out.push(sub.subject_name.clone());
            }
        }
    }
    out
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / (values.len() as f64)
    }
}

pub fn build_broadsheet(students: Vec<StudentResult>) -> Result<Broadsheet> {
    let key = check_single_cohort(&students)?.cloned();
    let ranked = rank_cohort(students);
    let subjects = subject_columns(&ranked);

    let mut per_subject: Vec<Vec<f64>> = vec![Vec::new(); subjects.len()];
    let mut rows = Vec::with_capacity(ranked.len());
    for s in &ranked {
        let cells: Vec<Option<f64>> = subjects
            .iter()
            .map(|name| {
                s.subjects
                    .iter()
                    .find(|sub| &sub.subject_name == name)
                    .map(|sub| sub.total)
            })
            .collect();
        for (i, cell) in cells.iter().enumerate() {
            if let Some(v) = cell {
                per_subject[i].push(*v);
            }
        }
        rows.push(BroadsheetRow {
            student_id: s.student_id.clone(),
            student_name: s.student_name.clone(),
            admission_no: s.admission_no.clone(),
            subject_totals: cells,
            total_score: s.total_score,
            overall_average: s.overall_average,
            position: s.overall_position,
            grade: s.grade.clone(),
        });
    }

    let totals: Vec<f64> = ranked.iter().map(|s| s.total_score).collect();
    let averages: Vec<f64> = ranked.iter().map(|s| s.overall_average).collect();
    Ok(Broadsheet {
        key,
        class_averages: ClassAverages {
            subjects: per_subject.iter().map(|v| mean(v)).collect(),
            total_score: mean(&totals),
            overall_average: mean(&averages),
        },
        class_size: rows.len(),
        subjects,
        rows,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentColumn {
    pub field: &'static str,
    pub label: &'static str,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardSubject {
    pub subject_name: String,
    #[serde(flatten)]
    pub components: ScoreComponents,
    pub total: f64,
    pub grade: String,
    pub remark: String,
    pub class_average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub position: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReportCardExtras {
    pub comments: ResultComments,
    pub attendance: Option<AttendanceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    #[serde(flatten)]
    pub key: ResultSetKey,
    pub student_id: String,
    pub student_name: String,
    pub admission_no: Option<String>,
    pub components: Vec<ComponentColumn>,
    pub subjects: Vec<ReportCardSubject>,
    pub total_score: f64,
    pub overall_average: f64,
    pub grade: String,
    pub remarks: String,
    pub position: Option<usize>,
    pub class_size: usize,
    #[serde(flatten)]
    pub comments: ResultComments,
    pub attendance: Option<AttendanceSummary>,
}

#[derive(Debug, Default)]
struct SubjectStats {
    totals: Vec<(String, f64)>,
}

impl SubjectStats {
    fn average(&self) -> f64 {
        let v: Vec<f64> = self.totals.iter().map(|(_, t)| *t).collect();
        mean(&v)
    }

    fn highest(&self) -> f64 {
        self.totals
            .iter()
            .map(|(_, t)| *t)
            .fold(None, |m: Option<f64>, t| Some(m.map_or(t, |m| m.max(t))))
            .unwrap_or(0.0)
    }

    fn lowest(&self) -> f64 {
        self.totals
            .iter()
            .map(|(_, t)| *t)
            .fold(None, |m: Option<f64>, t| Some(m.map_or(t, |m| m.min(t))))
            .unwrap_or(0.0)
    }

    /// Same tie rule as the overall ranking: earlier cohort entries first.
    fn position_of(&self, student_id: &str) -> usize {
        let mut order: Vec<&(String, f64)> = self.totals.iter().collect();
        order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        order
            .iter()
            .position(|(id, _)| id == student_id)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

/// Report card for one student of `cohort`. Totals and grade are derived
/// again from the subject rows and must agree with the ranked result.
pub fn build_report_card(
    student_id: &str,
    cohort: Vec<StudentResult>,
    ctx: GradingContext<'_>,
    extras: ReportCardExtras,
) -> Result<ReportCard> {
    check_single_cohort(&cohort)?;
    let ranked = rank_cohort(cohort);
    let student = ranked
        .iter()
        .find(|s| s.student_id == student_id)
        .ok_or_else(|| {
            ResultsError::integrity(format!("student {} is not part of the cohort", student_id))
        })?;
    let key = student.key.clone();

    let mut stats: HashMap<&str, SubjectStats> = HashMap::new();
    for s in &ranked {
        for sub in &s.subjects {
            stats
                .entry(sub.subject_name.as_str())
                .or_default()
                .totals
                .push((s.student_id.clone(), sub.total));
        }
    }

    let totals = compute_student_totals(&student.subjects);
    if (totals.total_score - student.total_score).abs() > 1e-9
        || (totals.overall_average - student.overall_average).abs() > 1e-9
    {
        return Err(ResultsError::integrity(format!(
            "totals for {} do not match their subjects",
            student.student_name
        )));
    }
    let grade = compute_student_grade(&totals, key.result_type, ctx)?;

    let shown = Component::for_result_type(key.result_type);
    let components = shown
        .iter()
        .map(|c| ComponentColumn {
            field: c.field_name(),
            label: c.label(),
            max: ctx.limits.max_for(*c),
        })
        .collect();

    let subjects = student
        .subjects
        .iter()
        .map(|sub| {
            let st = stats.get(sub.subject_name.as_str());
            ReportCardSubject {
                subject_name: sub.subject_name.clone(),
                components: sub.components,
                total: sub.total,
                grade: sub.grade.clone(),
                remark: sub.remark.clone(),
                class_average: st.map(|s| s.average()).unwrap_or(0.0),
                highest: st.map(|s| s.highest()).unwrap_or(0.0),
                lowest: st.map(|s| s.lowest()).unwrap_or(0.0),
                position: st.map(|s| s.position_of(student_id)).unwrap_or(0),
            }
        })
        .collect();

    Ok(ReportCard {
        key,
        student_id: student.student_id.clone(),
        student_name: student.student_name.clone(),
        admission_no: student.admission_no.clone(),
        components,
        subjects,
        total_score: totals.total_score,
        overall_average: totals.overall_average,
        grade: grade.grade,
        remarks: grade.remark,
        position: student.overall_position,
        class_size: ranked.len(),
        comments: extras.comments,
        attendance: extras.attendance,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceColumn {
    pub record_id: String,
    pub date: NaiveDate,
    pub subject: String,
    pub taken_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    pub student_name: String,
    pub marks: Vec<Option<AttendanceStatus>>,
    #[serde(flatten)]
    pub summary: AttendanceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceBroadsheet {
    pub columns: Vec<AttendanceColumn>,
    pub rows: Vec<AttendanceRow>,
}

/// One column per effective record (corrections replace what they
/// supersede), one row per roster student.
pub fn build_attendance_broadsheet(
    roster: &[RosterStudent],
    records: &[AttendanceRecord],
) -> AttendanceBroadsheet {
    let effective = effective_records(records);
    let columns = effective
        .iter()
        .map(|r| AttendanceColumn {
            record_id: r.id.clone(),
            date: r.date,
            subject: r.subject.clone(),
            taken_by: r.taken_by.clone(),
        })
        .collect();
    let rows = roster
        .iter()
        .map(|student| {
            let mut summary = AttendanceSummary::default();
            let marks = effective
                .iter()
                .map(|r| {
                    let mark = r
                        .students
                        .iter()
                        .find(|m| m.student_id == student.id)
                        .map(|m| m.status);
                    if let Some(status) = mark {
                        summary.add(status);
                    }
                    mark
                })
                .collect();
            AttendanceRow {
                student_id: student.id.clone(),
                student_name: student.display_name.clone(),
                marks,
                summary,
            }
        })
        .collect();
    AttendanceBroadsheet { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::tests::record;
    use crate::calc::tests::{result, term_key};
    use crate::calc::ComponentLimits;
    use crate::grading::GradingScale;

    fn cohort() -> Vec<StudentResult> {
        let key = term_key();
        vec![
            result("s1", &key, &[("Maths", 80.0), ("English", 60.0)]),
            result("s2", &key, &[("Maths", 90.0), ("Biology", 70.0)]),
            result("s3", &key, &[("English", 40.0)]),
        ]
    }

    #[test]
    fn empty_broadsheet_has_zeroed_averages() {
        let b = build_broadsheet(Vec::new()).expect("empty");
        assert!(b.rows.is_empty());
        assert!(b.subjects.is_empty());
        assert_eq!(b.key, None);
        assert_eq!(b.class_averages, ClassAverages::default());
        assert_eq!(b.class_size, 0);
    }

    #[test]
    fn broadsheet_columns_rows_and_averages() {
        let b = build_broadsheet(cohort()).expect("broadsheet");
        assert_eq!(b.subjects, vec!["Maths", "English", "Biology"]);
        let ids: Vec<&str> = b.rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1", "s3"]);
        assert_eq!(b.rows[0].subject_totals, vec![Some(90.0), None, Some(70.0)]);
        assert_eq!(b.rows[2].position, Some(3));
        // Subject means only count students who took the subject.
        assert_eq!(b.class_averages.subjects, vec![85.0, 50.0, 70.0]);
        assert!((b.class_averages.total_score - 340.0 / 3.0).abs() < 1e-9);
        assert!((b.class_averages.overall_average - 190.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn broadsheet_rejects_mixed_cohorts() {
        let mut students = cohort();
        students[1].key.session = "2023/2024".into();
        assert!(matches!(
            build_broadsheet(students),
            Err(ResultsError::DataIntegrity(_))
        ));
    }

    #[test]
    fn report_card_matches_subject_totals_and_stats() {
        let scale = GradingScale::default();
        let limits = ComponentLimits::default();
        let ctx = GradingContext {
            scale: &scale,
            limits: &limits,
        };
        let extras = ReportCardExtras {
            comments: ResultComments {
                teacher_comment: Some("Keep it up".into()),
                principal_comment: None,
            },
            attendance: None,
        };
        let card = build_report_card("s1", cohort(), ctx, extras).expect("card");
        assert_eq!(card.total_score, 140.0);
        assert_eq!(card.overall_average, 70.0);
        assert_eq!(card.grade, "B");
        assert_eq!(card.position, Some(2));
        assert_eq!(card.class_size, 3);
        assert_eq!(card.components.len(), 5);
        assert_eq!(card.comments.teacher_comment.as_deref(), Some("Keep it up"));

        let maths = &card.subjects[0];
        assert_eq!(maths.subject_name, "Maths");
        assert_eq!(maths.class_average, 85.0);
        assert_eq!(maths.highest, 90.0);
        assert_eq!(maths.lowest, 80.0);
        assert_eq!(maths.position, 2);
        let english = &card.subjects[1];
        assert_eq!(english.position, 1);
    }

    #[test]
    fn report_card_for_unknown_student_is_integrity_error() {
        let scale = GradingScale::default();
        let limits = ComponentLimits::default();
        let ctx = GradingContext {
            scale: &scale,
            limits: &limits,
        };
        assert!(matches!(
            build_report_card("nobody", cohort(), ctx, ReportCardExtras::default()),
            Err(ResultsError::DataIntegrity(_))
        ));
    }

    #[test]
    fn attendance_broadsheet_uses_corrected_records() {
        use AttendanceStatus::*;
        let roster = vec![
            RosterStudent {
                id: "s1".into(),
                display_name: "Okafor, Ada".into(),
                admission_no: None,
                sort_order: 0,
                active: true,
            },
            RosterStudent {
                id: "s2".into(),
                display_name: "Bello, Musa".into(),
                admission_no: None,
                sort_order: 1,
                active: true,
            },
        ];
        let first = record("r1", 1, "2024-09-16", "Maths", &[("s1", Absent), ("s2", Present)]);
        let mut fix = record("r2", 2, "2024-09-16", "Maths", &[("s1", Late), ("s2", Present)]);
        fix.supersedes = Some("r1".into());
        let next = record("r3", 3, "2024-09-17", "Maths", &[("s1", Absent)]);

        let sheet = build_attendance_broadsheet(&roster, &[first, fix, next]);
        let cols: Vec<&str> = sheet.columns.iter().map(|c| c.record_id.as_str()).collect();
        assert_eq!(cols, vec!["r2", "r3"]);
        assert_eq!(sheet.rows[0].marks, vec![Some(Late), Some(Absent)]);
        assert_eq!(sheet.rows[0].summary.recorded, 2);
        assert!((sheet.rows[0].summary.percentage - 50.0).abs() < 1e-9);
        assert_eq!(sheet.rows[1].marks, vec![Some(Present), None]);
        assert_eq!(sheet.rows[1].summary.percentage, 100.0);
    }
}
