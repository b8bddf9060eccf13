//! Draft → locked → approved lifecycle of a result set.
//!
//! Teachers enter scores while a set is `draft`, submit it (`locked`), and a
//! principal either approves it or rejects it back to `draft`. Students and
//! parents only ever see `approved` sets.

use crate::db::now_stamp;
use crate::error::{Result, ResultsError};
use crate::model::{CohortSnapshot, ResultSet, ResultSetKey, ResultStatus};
use crate::store::{ResultSetFilter, ResultSetStore};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
    /// Any write to scores or comments of a set.
    Edit,
}

impl WorkflowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowAction::Submit => "submit",
            WorkflowAction::Approve => "approve",
            WorkflowAction::Reject => "reject",
            WorkflowAction::Edit => "edit",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status after `action`, or `InvalidStateTransition` when `current` does not
/// allow it. `Edit` never changes the status.
pub fn next_status(current: ResultStatus, action: WorkflowAction) -> Result<ResultStatus> {
    use ResultStatus::*;
    use WorkflowAction::*;
    match (current, action) {
        (Draft, Submit) => Ok(Locked),
        (Locked, Approve) => Ok(Approved),
        (Locked, Reject) => Ok(Draft),
        (Draft, Edit) => Ok(Draft),
        (current, action) => Err(ResultsError::transition(action, current)),
    }
}

pub struct ApprovalWorkflow<'a, S: ResultSetStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ResultSetStore + ?Sized> ApprovalWorkflow<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &ResultSetKey) -> Result<ResultSet> {
        self.store
            .get(key)?
            .ok_or_else(|| ResultsError::not_found(format!("result set not found: {}", key)))
    }

    /// Creates a new draft set; an existing key is a data-integrity error.
    pub fn create(&self, key: ResultSetKey) -> Result<ResultSet> {
        let mut set = ResultSet::draft(key);
        set.revision = self.store.next_revision()?;
        set.updated_at = Some(now_stamp());
        self.store.insert(&set)?;
        info!(key = %set.key, revision = set.revision, "result set created");
        Ok(set)
    }

    /// Opens the set for entry, creating the draft on first use.
    pub fn begin(&self, key: ResultSetKey) -> Result<ResultSet> {
        match self.store.get(&key)? {
            Some(existing) => Ok(existing),
            None => self.create(key),
        }
    }

    /// Fails unless the set exists and is still a draft.
    pub fn ensure_editable(&self, key: &ResultSetKey) -> Result<ResultSet> {
        let set = self.get(key)?;
        next_status(set.status, WorkflowAction::Edit)?;
        Ok(set)
    }

    /// Locks the set. `snapshot` becomes the basis of every later view of it.
    pub fn submit(
        &self,
        key: &ResultSetKey,
        actor: &str,
        snapshot: CohortSnapshot,
    ) -> Result<ResultSet> {
        self.apply(key, WorkflowAction::Submit, |set, now| {
            set.submitted_by = Some(actor.to_string());
            set.submitted_date = Some(now.to_string());
            set.rejection_reason = None;
            set.snapshot = Some(snapshot);
        })
    }

    pub fn approve(&self, key: &ResultSetKey, actor: &str) -> Result<ResultSet> {
        self.apply(key, WorkflowAction::Approve, |set, now| {
            set.reviewed_by = Some(actor.to_string());
            set.reviewed_date = Some(now.to_string());
        })
    }

    pub fn reject(&self, key: &ResultSetKey, actor: &str, reason: &str) -> Result<ResultSet> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ResultsError::validation("rejection reason must not be empty"));
        }
        self.apply(key, WorkflowAction::Reject, |set, now| {
            set.reviewed_by = Some(actor.to_string());
            set.reviewed_date = Some(now.to_string());
            set.rejection_reason = Some(reason.to_string());
            set.snapshot = None;
        })
    }

    /// Sets changed after `revision`, oldest first. Clients poll this on
    /// demand instead of re-reading everything.
    pub fn changes_since(&self, revision: i64) -> Result<Vec<ResultSet>> {
        self.store.list(&ResultSetFilter {
            since_revision: Some(revision),
            ..Default::default()
        })
    }

    fn apply<F>(&self, key: &ResultSetKey, action: WorkflowAction, stamp: F) -> Result<ResultSet>
    where
        F: FnOnce(&mut ResultSet, &str),
    {
        let current = self.get(key)?;
        let status = next_status(current.status, action)?;
        let now = now_stamp();
        let mut next = current.clone();
        next.status = status;
        stamp(&mut next, &now);
        next.revision = self.store.next_revision()?;
        next.updated_at = Some(now);
        self.store.update(&next)?;
        info!(
            key = %key,
            action = %action,
            from = %current.status,
            to = %next.status,
            revision = next.revision,
            "result set transition"
        );
        Ok(next)
    }
}
