use crate::error::{Result, ResultsError};
use crate::grading::{Grade, GradingScale};
use crate::model::{
    Component, ResultSetKey, ResultType, RosterStudent, ScoreComponents, StudentResult,
    SubjectScore,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Maximum mark per score component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentLimits {
    pub periodic_test: f64,
    pub mid_term_test: f64,
    pub quiz_practical: f64,
    pub class_participation: f64,
    pub exam_score: f64,
}

impl Default for ComponentLimits {
    fn default() -> Self {
        Self {
            periodic_test: 10.0,
            mid_term_test: 10.0,
            quiz_practical: 10.0,
            class_participation: 10.0,
            exam_score: 60.0,
        }
    }
}

impl ComponentLimits {
    pub fn max_for(&self, component: Component) -> f64 {
        match component {
            Component::PeriodicTest => self.periodic_test,
            Component::MidTermTest => self.mid_term_test,
            Component::QuizPractical => self.quiz_practical,
            Component::ClassParticipation => self.class_participation,
            Component::ExamScore => self.exam_score,
        }
    }

    /// Highest attainable subject total for a result type.
    pub fn scale_max(&self, result_type: ResultType) -> f64 {
        Component::for_result_type(result_type)
            .iter()
            .map(|c| self.max_for(*c))
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        for c in Component::ALL {
            let max = self.max_for(c);
            if !max.is_finite() || !(0.0..=100.0).contains(&max) {
                return Err(ResultsError::validation(format!(
                    "{} max must be within 0..=100",
                    c.field_name()
                )));
            }
        }
        if self.scale_max(ResultType::Ca) <= 0.0 {
            return Err(ResultsError::validation(
                "continuous assessment components must have a positive total",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GradingContext<'a> {
    pub scale: &'a GradingScale,
    pub limits: &'a ComponentLimits,
}

/// Sums the present components; absent components count as 0.
pub fn compute_subject_total(components: &ScoreComponents) -> f64 {
    // `sum` of nothing is -0.0.
    components.present().fold(0.0, |acc, (_, v)| acc + v)
}

pub fn compute_subject_grade(total: f64, scale_max: f64, scale: &GradingScale) -> Result<Grade> {
    scale.grade_for_score(total, scale_max)
}

/// Trims and collapses inner whitespace. Case is kept; the store matches
/// subject names without case.
pub fn normalize_subject_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validates one raw entry and returns the normalized subject name and
/// components. This is the only place raw input is checked.
pub fn normalize_entry(
    subject_name: &str,
    components: ScoreComponents,
    result_type: ResultType,
    limits: &ComponentLimits,
) -> Result<(String, ScoreComponents)> {
    let name = normalize_subject_name(subject_name);
    if name.is_empty() {
        return Err(ResultsError::validation("subjectName must not be empty"));
    }
    let allowed = Component::for_result_type(result_type);
    for (c, v) in components.present() {
        if !allowed.contains(&c) {
            return Err(ResultsError::validation(format!(
                "{} is not part of a {} result",
                c.field_name(),
                result_type
            )));
        }
        let max = limits.max_for(c);
        if !v.is_finite() || v < 0.0 || v > max {
            return Err(ResultsError::validation(format!(
                "{} for {} must be within 0..={}",
                c.field_name(),
                name,
                max
            )));
        }
    }
    Ok((name, components))
}

pub fn subject_score(
    subject_name: &str,
    components: ScoreComponents,
    result_type: ResultType,
    ctx: GradingContext<'_>,
) -> Result<SubjectScore> {
    let (name, components) = normalize_entry(subject_name, components, result_type, ctx.limits)?;
    let total = compute_subject_total(&components);
    let grade = compute_subject_grade(total, ctx.limits.scale_max(result_type), ctx.scale)?;
    Ok(SubjectScore {
        subject_name: name,
        components,
        total,
        grade: grade.grade,
        remark: grade.remark,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTotals {
    pub total_score: f64,
    pub overall_average: f64,
}

pub fn compute_student_totals(subjects: &[SubjectScore]) -> StudentTotals {
    let total_score = subjects.iter().fold(0.0, |acc, s| acc + s.total);
    let overall_average = if subjects.is_empty() {
        0.0
    } else {
        total_score / (subjects.len() as f64)
    };
    StudentTotals {
        total_score,
        overall_average,
    }
}

/// The average is per subject, so it is graded against one subject's scale.
pub fn compute_student_grade(
    totals: &StudentTotals,
    result_type: ResultType,
    ctx: GradingContext<'_>,
) -> Result<Grade> {
    ctx.scale
        .grade_for_score(totals.overall_average, ctx.limits.scale_max(result_type))
}

pub fn build_student_result(
    student: &RosterStudent,
    key: &ResultSetKey,
    entries: &[(String, ScoreComponents)],
    ctx: GradingContext<'_>,
) -> Result<StudentResult> {
    let subjects = entries
        .iter()
        .map(|(name, comps)| subject_score(name, *comps, key.result_type, ctx))
        .collect::<Result<Vec<_>>>()?;
    let totals = compute_student_totals(&subjects);
    let grade = compute_student_grade(&totals, key.result_type, ctx)?;
    Ok(StudentResult {
        student_id: student.id.clone(),
        student_name: student.display_name.clone(),
        admission_no: student.admission_no.clone(),
        key: key.clone(),
        subjects,
        total_score: totals.total_score,
        overall_average: totals.overall_average,
        overall_position: None,
        grade: grade.grade,
        remarks: grade.remark,
    })
}

fn by_average_desc(a: &StudentResult, b: &StudentResult) -> Ordering {
    b.overall_average
        .partial_cmp(&a.overall_average)
        .unwrap_or(Ordering::Equal)
}

/// Orders a cohort by overall average (highest first) and assigns 1-based
/// positions. Equal averages keep their input order and still get distinct
/// sequential positions.
pub fn rank_cohort(mut students: Vec<StudentResult>) -> Vec<StudentResult> {
    students.sort_by(by_average_desc);
    for (i, s) in students.iter_mut().enumerate() {
        s.overall_position = Some(i + 1);
    }
    students
}

/// Every result must belong to the same cohort.
pub fn check_single_cohort(students: &[StudentResult]) -> Result<Option<&ResultSetKey>> {
    let Some(first) = students.first() else {
        return Ok(None);
    };
    if let Some(other) = students.iter().find(|s| s.key != first.key) {
        return Err(ResultsError::integrity(format!(
            "cohort mismatch: {} vs {}",
            first.key, other.key
        )));
    }
    Ok(Some(&first.key))
}
