use crate::calc::{normalize_entry, ComponentLimits, GradingContext};
use crate::db;
use crate::entries::load_entries;
use crate::grading::GradingScale;
use crate::store::{ResultSetFilter, ResultSetStore};
use chrono::Datelike;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Components,
    Academic,
}

impl SetupSection {
    pub const ALL: [SetupSection; 3] = [
        SetupSection::Grading,
        SetupSection::Components,
        SetupSection::Academic,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "components" => Some(Self::Components),
            "academic" => Some(Self::Academic),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Components => "components",
            Self::Academic => "academic",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Components => "setup.components",
            Self::Academic => "setup.academic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSettings {
    pub current_term: String,
    pub current_session: String,
}

impl Default for AcademicSettings {
    fn default() -> Self {
        Self {
            current_term: "First Term".to_string(),
            current_session: session_for(chrono::Local::now().date_naive()),
        }
    }
}

/// Sessions run September to August, written `YYYY/YYYY`.
pub fn session_for(date: chrono::NaiveDate) -> String {
    let start = if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}/{}", start, start + 1)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultsConfig {
    pub grading: GradingScale,
    pub components: ComponentLimits,
    pub academic: AcademicSettings,
}

impl ResultsConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self {
            grading: serde_json::from_value(load_section(conn, SetupSection::Grading)?)?,
            components: serde_json::from_value(load_section(conn, SetupSection::Components)?)?,
            academic: serde_json::from_value(load_section(conn, SetupSection::Academic)?)?,
        })
    }

    pub fn grading_context(&self) -> GradingContext<'_> {
        GradingContext {
            scale: &self.grading,
            limits: &self.components,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!(GradingScale::default()),
        SetupSection::Components => json!(ComponentLimits::default()),
        SetupSection::Academic => json!(AcademicSettings::default()),
    }
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Applies `patch` to `current`, validating each field and the resulting
/// section as a whole.
pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "bands" => {
                    let scale: GradingScale =
                        serde_json::from_value(json!({ "bands": v.clone() }))
                            .map_err(|e| format!("bands: {}", e))?;
                    scale.validate().map_err(|e| e.to_string())?;
                    obj.insert(k.clone(), json!(scale.bands));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Components => match k.as_str() {
                "periodicTest" | "midTermTest" | "quizPractical" | "classParticipation"
                | "examScore" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown components field: {}", k)),
            },
            SetupSection::Academic => match k.as_str() {
                "currentTerm" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                "currentSession" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 20)?));
                }
                _ => return Err(format!("unknown academic field: {}", k)),
            },
        }
    }
    if section == SetupSection::Components {
        let limits: ComponentLimits =
            serde_json::from_value(current.clone()).map_err(|e| e.to_string())?;
        limits.validate().map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            } else {
                tracing::warn!(section = section.name(), "ignoring unreadable saved settings");
            }
        }
    }
    Ok(current)
}

/// First stored entry that `limits` would reject, among sets still computed
/// from the live settings (those without a snapshot).
fn live_entry_conflict(conn: &Connection, limits: &ComponentLimits) -> anyhow::Result<Option<String>> {
    for set in conn.list(&ResultSetFilter::default())? {
        if set.snapshot.is_some() {
            continue;
        }
        let mut by_student: Vec<_> = load_entries(conn, &set.key)?.into_iter().collect();
        by_student.sort_by(|a, b| a.0.cmp(&b.0));
        for (student_id, entries) in by_student {
            for (subject, comps) in entries {
                if let Err(e) = normalize_entry(&subject, comps, set.key.result_type, limits) {
                    return Ok(Some(format!(
                        "stored entry for student {} in {} would become invalid: {}",
                        student_id, set.key, e
                    )));
                }
            }
        }
    }
    Ok(None)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    if section == SetupSection::Components {
        let limits: ComponentLimits = serde_json::from_value(current.clone())?;
        if let Some(msg) = live_entry_conflict(conn, &limits)? {
            return Ok(Err(msg));
        }
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}
