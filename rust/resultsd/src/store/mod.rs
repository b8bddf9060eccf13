#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{ResultSet, ResultSetKey, ResultStatus, ResultType};

#[derive(Debug, Clone, Default)]
pub struct ResultSetFilter {
    pub class_id: Option<String>,
    pub term: Option<String>,
    pub session: Option<String>,
    pub result_type: Option<ResultType>,
    pub status: Option<ResultStatus>,
    /// Only sets whose revision is strictly greater than this.
    pub since_revision: Option<i64>,
}

#[cfg(test)]
impl ResultSetFilter {
    /// In-process counterpart of the SQL filter in the SQLite store.
    pub fn matches(&self, set: &ResultSet) -> bool {
        let k = &set.key;
        self.class_id.as_ref().map(|v| *v == k.class_id).unwrap_or(true)
            && self.term.as_ref().map(|v| *v == k.term).unwrap_or(true)
            && self.session.as_ref().map(|v| *v == k.session).unwrap_or(true)
            && self.result_type.map(|v| v == k.result_type).unwrap_or(true)
            && self.status.map(|v| v == set.status).unwrap_or(true)
            && self
                .since_revision
                .map(|r| set.revision > r)
                .unwrap_or(true)
    }
}

/// Persistence seam for result-set workflow state.
///
/// `insert` must reject a key that already exists and `update` must reject
/// a key that does not.
pub trait ResultSetStore {
    fn get(&self, key: &ResultSetKey) -> Result<Option<ResultSet>>;
    fn insert(&self, set: &ResultSet) -> Result<()>;
    fn update(&self, set: &ResultSet) -> Result<()>;
    /// Matching sets ordered by revision.
    fn list(&self, filter: &ResultSetFilter) -> Result<Vec<ResultSet>>;
    fn next_revision(&self) -> Result<i64>;
}
