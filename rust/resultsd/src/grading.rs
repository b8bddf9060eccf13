use crate::error::{Result, ResultsError};
use serde::{Deserialize, Serialize};

/// Slack allowed when a derived percentage lands a hair outside 0..=100.
const PERCENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub grade: String,
    /// Inclusive lower bound, as a percentage.
    pub min: f64,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub grade: String,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    pub bands: Vec<GradeBand>,
}

impl Default for GradingScale {
    fn default() -> Self {
        let band = |grade: &str, min: f64, remark: &str| GradeBand {
            grade: grade.to_string(),
            min,
            remark: remark.to_string(),
        };
        Self {
            bands: vec![
                band("A", 80.0, "Excellent"),
                band("B", 70.0, "Very Good"),
                band("C", 60.0, "Good"),
                band("D", 50.0, "Pass"),
                band("F", 0.0, "Fail"),
            ],
        }
    }
}

impl GradingScale {
    /// Bands must be strictly descending and end at 0 so every percentage
    /// in 0..=100 maps to exactly one band.
    pub fn validate(&self) -> Result<()> {
        if self.bands.is_empty() {
            return Err(ResultsError::validation("grading scale has no bands"));
        }
        let mut prev: Option<f64> = None;
        for b in &self.bands {
            if b.grade.trim().is_empty() {
                return Err(ResultsError::validation("grade label must not be empty"));
            }
            if !b.min.is_finite() || !(0.0..=100.0).contains(&b.min) {
                return Err(ResultsError::validation(format!(
                    "band {} min must be within 0..=100",
                    b.grade
                )));
            }
            if let Some(p) = prev {
                if b.min >= p {
                    return Err(ResultsError::validation(
                        "grade bands must be strictly descending by min",
                    ));
                }
            }
            prev = Some(b.min);
        }
        if prev != Some(0.0) {
            return Err(ResultsError::validation("last grade band must start at 0"));
        }
        Ok(())
    }

    pub fn grade_for(&self, percentage: f64) -> Result<Grade> {
        if !percentage.is_finite() {
            return Err(ResultsError::validation("percentage must be a finite number"));
        }
        if percentage < -PERCENT_EPSILON || percentage > 100.0 + PERCENT_EPSILON {
            return Err(ResultsError::validation(format!(
                "percentage {} is outside 0..=100",
                percentage
            )));
        }
        let p = percentage.clamp(0.0, 100.0);
        self.bands
            .iter()
            .find(|b| p >= b.min)
            .map(|b| Grade {
                grade: b.grade.clone(),
                remark: b.remark.clone(),
            })
            .ok_or_else(|| ResultsError::validation("no grade band covers percentage"))
    }

    /// Grades a raw score on a `0..=max` scale (e.g. 0..=40 for CA).
    pub fn grade_for_score(&self, score: f64, max: f64) -> Result<Grade> {
        if max.is_nan() || max <= 0.0 {
            return Err(ResultsError::validation("scale max must be positive"));
        }
        if !score.is_finite() || score < 0.0 || score > max + PERCENT_EPSILON {
            return Err(ResultsError::validation(format!(
                "score {} is outside 0..={}",
                score, max
            )));
        }
        self.grade_for(100.0 * score / max)
    }
}
