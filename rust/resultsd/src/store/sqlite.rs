use super::{ResultSetFilter, ResultSetStore};
use crate::error::{Result, ResultsError};
use crate::model::{CohortSnapshot, ResultSet, ResultSetKey, ResultStatus, ResultType};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = "class_id, term, session, result_type, status, submitted_by,
     submitted_date, reviewed_by, reviewed_date, rejection_reason, revision, updated_at,
     snapshot_json";

struct RawResultSet {
    class_id: String,
    term: String,
    session: String,
    result_type: String,
    status: String,
    submitted_by: Option<String>,
    submitted_date: Option<String>,
    reviewed_by: Option<String>,
    reviewed_date: Option<String>,
    rejection_reason: Option<String>,
    revision: i64,
    updated_at: Option<String>,
    snapshot_json: Option<String>,
}

fn read_row(r: &Row<'_>) -> rusqlite::Result<RawResultSet> {
    Ok(RawResultSet {
        class_id: r.get(0)?,
        term: r.get(1)?,
        session: r.get(2)?,
        result_type: r.get(3)?,
        status: r.get(4)?,
        submitted_by: r.get(5)?,
        submitted_date: r.get(6)?,
        reviewed_by: r.get(7)?,
        reviewed_date: r.get(8)?,
        rejection_reason: r.get(9)?,
        revision: r.get(10)?,
        updated_at: r.get(11)?,
        snapshot_json: r.get(12)?,
    })
}

impl RawResultSet {
    fn into_set(self) -> Result<ResultSet> {
        let (Some(result_type), Some(status)) = (
            ResultType::parse(&self.result_type),
            ResultStatus::parse(&self.status),
        ) else {
            return Err(ResultsError::integrity(format!(
                "result set {} / {} / {} has unreadable type '{}' or status '{}'",
                self.class_id, self.term, self.session, self.result_type, self.status
            )));
        };
        let snapshot = self
            .snapshot_json
            .as_deref()
            .map(|raw| serde_json::from_str::<CohortSnapshot>(raw))
            .transpose()
            .map_err(|e| {
                ResultsError::integrity(format!(
                    "result set {} / {} / {} has an unreadable snapshot: {}",
                    self.class_id, self.term, self.session, e
                ))
            })?;
        Ok(ResultSet {
            key: ResultSetKey {
                class_id: self.class_id,
                term: self.term,
                session: self.session,
                result_type,
            },
            status,
            submitted_by: self.submitted_by,
            submitted_date: self.submitted_date,
            reviewed_by: self.reviewed_by,
            reviewed_date: self.reviewed_date,
            rejection_reason: self.rejection_reason,
            revision: self.revision,
            updated_at: self.updated_at,
            snapshot,
        })
    }
}

fn snapshot_json(set: &ResultSet) -> Result<Option<String>> {
    Ok(set.snapshot.as_ref().map(serde_json::to_string).transpose()?)
}

impl ResultSetStore for Connection {
    fn get(&self, key: &ResultSetKey) -> Result<Option<ResultSet>> {
        let sql = format!(
            "SELECT {} FROM result_sets
             WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?",
            SELECT_COLUMNS
        );
        let row = self
            .query_row(
                &sql,
                (
                    &key.class_id,
                    &key.term,
                    &key.session,
                    key.result_type.as_str(),
                ),
                read_row,
            )
            .optional()?;
        row.map(RawResultSet::into_set).transpose()
    }

    fn insert(&self, set: &ResultSet) -> Result<()> {
        if ResultSetStore::get(self, &set.key)?.is_some() {
            return Err(ResultsError::integrity(format!(
                "result set already exists: {}",
                set.key
            )));
        }
        self.execute(
            "INSERT INTO result_sets(
               class_id, term, session, result_type, status, submitted_by, submitted_date,
               reviewed_by, reviewed_date, rejection_reason, revision, updated_at, snapshot_json
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &set.key.class_id,
                &set.key.term,
                &set.key.session,
                set.key.result_type.as_str(),
                set.status.as_str(),
                set.submitted_by.as_deref(),
                set.submitted_date.as_deref(),
                set.reviewed_by.as_deref(),
                set.reviewed_date.as_deref(),
                set.rejection_reason.as_deref(),
                set.revision,
                set.updated_at.as_deref(),
                snapshot_json(set)?,
            ),
        )?;
        Ok(())
    }

    fn update(&self, set: &ResultSet) -> Result<()> {
        let changed = self.execute(
            "UPDATE result_sets
             SET status = ?, submitted_by = ?, submitted_date = ?, reviewed_by = ?,
                 reviewed_date = ?, rejection_reason = ?, revision = ?, updated_at = ?,
                 snapshot_json = ?
             WHERE class_id = ? AND term = ? AND session = ? AND result_type = ?",
            (
                set.status.as_str(),
                set.submitted_by.as_deref(),
                set.submitted_date.as_deref(),
                set.reviewed_by.as_deref(),
                set.reviewed_date.as_deref(),
                set.rejection_reason.as_deref(),
                set.revision,
                set.updated_at.as_deref(),
                snapshot_json(set)?,
                &set.key.class_id,
                &set.key.term,
                &set.key.session,
                set.key.result_type.as_str(),
            ),
        )?;
        if changed == 0 {
            return Err(ResultsError::not_found(format!(
                "result set not found: {}",
                set.key
            )));
        }
        Ok(())
    }

    fn list(&self, filter: &ResultSetFilter) -> Result<Vec<ResultSet>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();
        if let Some(v) = &filter.class_id {
            clauses.push("class_id = ?");
            bind.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.term {
            clauses.push("term = ?");
            bind.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.session {
            clauses.push("session = ?");
            bind.push(Value::Text(v.clone()));
        }
        if let Some(v) = filter.result_type {
            clauses.push("result_type = ?");
            bind.push(Value::Text(v.as_str().to_string()));
        }
        if let Some(v) = filter.status {
            clauses.push("status = ?");
            bind.push(Value::Text(v.as_str().to_string()));
        }
        if let Some(v) = filter.since_revision {
            clauses.push("revision > ?");
            bind.push(Value::Integer(v));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM result_sets {} ORDER BY revision, class_id, term, session, result_type",
            SELECT_COLUMNS, where_sql
        );
        let mut stmt = self.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawResultSet::into_set).collect()
    }

    fn next_revision(&self) -> Result<i64> {
        Ok(self.query_row(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM result_sets",
            [],
            |r| r.get(0),
        )?)
    }
}
