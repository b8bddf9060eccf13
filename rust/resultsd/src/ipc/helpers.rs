use crate::attendance::parse_date;
use crate::config::{AcademicSettings, ResultsConfig};
use crate::error::ResultsError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::{ResultSetKey, ResultStatus, ResultType};
use crate::store::ResultSetFilter;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ResultsError> for HandlerErr {
    fn from(e: ResultsError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        ResultsError::from(e).into()
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent or null is `None`; any other non-string is rejected.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    optional_str(params, key)?
        .map(|s| parse_date(&s, key).map_err(|e| HandlerErr::bad_params(e.to_string())))
        .transpose()
}

pub fn parse_params<T: DeserializeOwned>(value: &Value) -> Result<T, HandlerErr> {
    serde_json::from_value(value.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Reads `{classId, term?, session?, resultType}` from `params.key`, or from
/// `params` itself when there is no `key` object. Missing term and session
/// fall back to the workspace's academic settings.
pub fn parse_key(params: &Value, academic: &AcademicSettings) -> Result<ResultSetKey, HandlerErr> {
    let obj = match params.get("key") {
        Some(k) if k.is_object() => k,
        Some(_) => return Err(HandlerErr::bad_params("key must be an object")),
        None => params,
    };
    let class_id = required_str(obj, "classId")?;
    let term = optional_str(obj, "term")?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| academic.current_term.clone());
    let session = optional_str(obj, "session")?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| academic.current_session.clone());
    let raw_type = required_str(obj, "resultType")?;
    let result_type = ResultType::parse(&raw_type).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "resultType must be one of: CA, Term".to_string(),
        details: Some(json!({ "resultType": raw_type })),
    })?;
    Ok(ResultSetKey::new(class_id, term, session, result_type))
}

/// Optional `classId`, `term`, `session`, `resultType` and `status` filters.
pub fn parse_filter(params: &Value) -> Result<ResultSetFilter, HandlerErr> {
    let result_type = optional_str(params, "resultType")?
        .map(|raw| {
            ResultType::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("resultType must be one of: CA, Term"))
        })
        .transpose()?;
    let status = optional_str(params, "status")?
        .map(|raw| {
            ResultStatus::parse(&raw).ok_or_else(|| {
                HandlerErr::bad_params("status must be one of: draft, locked, approved")
            })
        })
        .transpose()?;
    Ok(ResultSetFilter {
        class_id: optional_str(params, "classId")?,
        term: optional_str(params, "term")?,
        session: optional_str(params, "session")?,
        result_type,
        status,
        since_revision: None,
    })
}

/// Runs a handler body against the open workspace, turning its error into a
/// response and logging it.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");
    match f(conn) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(e) => {
            tracing::warn!(
                id = %req.id,
                method = %req.method,
                code = e.code,
                message = %e.message,
                "request failed"
            );
            e.response(&req.id)
        }
    }
}

/// Like [`with_conn`], with the workspace configuration loaded.
pub fn with_config<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &ResultsConfig) -> Result<Value, HandlerErr>,
{
    with_conn(state, req, |conn| {
        let cfg = ResultsConfig::load(conn)?;
        f(conn, &cfg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn academic() -> AcademicSettings {
        AcademicSettings {
            current_term: "Second Term".into(),
            current_session: "2024/2025".into(),
        }
    }

    #[test]
    fn key_defaults_term_and_session() {
        let params = json!({ "key": { "classId": "JSS1", "resultType": "ca" } });
        let key = parse_key(&params, &academic()).expect("key");
        assert_eq!(key.term, "Second Term");
        assert_eq!(key.session, "2024/2025");
        assert_eq!(key.result_type, ResultType::Ca);
    }

    #[test]
    fn key_can_sit_at_top_level() {
        let params = json!({
            "classId": "JSS1",
            "term": "First Term",
            "session": "2023/2024",
            "resultType": "Term"
        });
        let key = parse_key(&params, &academic()).expect("key");
        assert_eq!(key.session, "2023/2024");
    }

    #[test]
    fn bad_result_type_is_bad_params() {
        let params = json!({ "classId": "JSS1", "resultType": "final" });
        let e = parse_key(&params, &academic()).expect_err("bad");
        assert_eq!(e.code, "bad_params");
        assert!(parse_key(&json!({ "key": 3 }), &academic()).is_err());
    }

    #[test]
    fn filter_parses_enums_and_rejects_unknown_status() {
        let f = parse_filter(&json!({ "classId": "JSS1", "status": "Locked" })).expect("filter");
        assert_eq!(f.status, Some(ResultStatus::Locked));
        assert_eq!(f.class_id.as_deref(), Some("JSS1"));
        assert!(parse_filter(&json!({ "status": "published" })).is_err());
    }

    #[test]
    fn results_errors_keep_code_and_details() {
        let resp = HandlerErr::from(ResultsError::transition("approve", "draft")).response("7");
        assert_eq!(resp["id"], "7");
        assert_eq!(resp["error"]["code"], "invalid_state_transition");
        assert_eq!(resp["error"]["details"]["attempted"], "approve");
        assert_eq!(resp["error"]["details"]["current"], "draft");
    }

    #[test]
    fn optional_values_reject_wrong_types() {
        let params = json!({ "from": 5, "to": "2024-09-30", "note": null });
        assert!(optional_date(&params, "from").is_err());
        assert!(optional_date(&params, "to").expect("to").is_some());
        assert_eq!(optional_str(&params, "note").expect("null"), None);
    }
}
