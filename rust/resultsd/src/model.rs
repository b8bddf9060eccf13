use crate::calc::ComponentLimits;
use crate::grading::GradingScale;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResultType {
    #[serde(rename = "CA")]
    Ca,
    #[serde(rename = "Term")]
    Term,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Ca => "CA",
            ResultType::Term => "Term",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ca" => Some(ResultType::Ca),
            "term" => Some(ResultType::Term),
            _ => None,
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Draft,
    Locked,
    Approved,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Draft => "draft",
            ResultStatus::Locked => "locked",
            ResultStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(ResultStatus::Draft),
            "locked" => Some(ResultStatus::Locked),
            "approved" => Some(ResultStatus::Approved),
            _ => None,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of a result set. Also identifies a ranking cohort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetKey {
    pub class_id: String,
    pub term: String,
    pub session: String,
    pub result_type: ResultType,
}

impl ResultSetKey {
    pub fn new(
        class_id: impl Into<String>,
        term: impl Into<String>,
        session: impl Into<String>,
        result_type: ResultType,
    ) -> Self {
        Self {
            class_id: class_id.into(),
            term: term.into(),
            session: session.into(),
            result_type,
        }
    }
}

impl fmt::Display for ResultSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} / {}",
            self.class_id, self.term, self.session, self.result_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    #[serde(flatten)]
    pub key: ResultSetKey,
    pub status: ResultStatus,
    pub submitted_by: Option<String>,
    pub submitted_date: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_date: Option<String>,
    pub rejection_reason: Option<String>,
    pub revision: i64,
    pub updated_at: Option<String>,
    /// Present while the set is locked or approved.
    #[serde(skip)]
    pub snapshot: Option<CohortSnapshot>,
}

/// Grading settings and roster captured when a set is submitted. Locked and
/// approved sets are computed from this, not from the live settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSnapshot {
    pub scale: GradingScale,
    pub limits: ComponentLimits,
    pub roster: Vec<RosterStudent>,
}

impl CohortSnapshot {
    pub fn includes(&self, student_id: &str) -> bool {
        self.roster.iter().any(|s| s.id == student_id)
    }
}

impl ResultSet {
    pub fn draft(key: ResultSetKey) -> Self {
        Self {
            key,
            status: ResultStatus::Draft,
            submitted_by: None,
            submitted_date: None,
            reviewed_by: None,
            reviewed_date: None,
            rejection_reason: None,
            revision: 0,
            updated_at: None,
            snapshot: None,
        }
    }

    /// Students and parents only ever see approved results.
    pub fn is_published(&self) -> bool {
        self.status == ResultStatus::Approved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    PeriodicTest,
    MidTermTest,
    QuizPractical,
    ClassParticipation,
    ExamScore,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::PeriodicTest,
        Component::MidTermTest,
        Component::QuizPractical,
        Component::ClassParticipation,
        Component::ExamScore,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            Component::PeriodicTest => "periodicTest",
            Component::MidTermTest => "midTermTest",
            Component::QuizPractical => "quizPractical",
            Component::ClassParticipation => "classParticipation",
            Component::ExamScore => "examScore",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Component::PeriodicTest => "Periodic Test",
            Component::MidTermTest => "Mid-Term Test",
            Component::QuizPractical => "Quiz/Practical",
            Component::ClassParticipation => "Class Participation",
            Component::ExamScore => "Exam",
        }
    }

    /// Components that make up a result of the given type, in display order.
    pub fn for_result_type(result_type: ResultType) -> &'static [Component] {
        match result_type {
            ResultType::Ca => &Component::ALL[..4],
            ResultType::Term => &Component::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreComponents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic_test: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid_term_test: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_practical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_participation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_score: Option<f64>,
}

impl ScoreComponents {
    pub fn get(&self, component: Component) -> Option<f64> {
        match component {
            Component::PeriodicTest => self.periodic_test,
            Component::MidTermTest => self.mid_term_test,
            Component::QuizPractical => self.quiz_practical,
            Component::ClassParticipation => self.class_participation,
            Component::ExamScore => self.exam_score,
        }
    }

    pub fn present(&self) -> impl Iterator<Item = (Component, f64)> + '_ {
        Component::ALL
            .iter()
            .filter_map(move |c| self.get(*c).map(|v| (*c, v)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_name: String,
    #[serde(flatten)]
    pub components: ScoreComponents,
    pub total: f64,
    pub grade: String,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub student_name: String,
    pub admission_no: Option<String>,
    #[serde(flatten)]
    pub key: ResultSetKey,
    pub subjects: Vec<SubjectScore>,
    pub total_score: f64,
    pub overall_average: f64,
    pub overall_position: Option<usize>,
    pub grade: String,
    pub remarks: String,
}

/// Roster entry as held by the student directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub admission_no: Option<String>,
    pub sort_order: i64,
    pub active: bool,
}
