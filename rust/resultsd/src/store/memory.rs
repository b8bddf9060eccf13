use super::{ResultSetFilter, ResultSetStore};
use crate::error::{Result, ResultsError};
use crate::model::{ResultSet, ResultSetKey};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    sets: BTreeMap<ResultSetKey, ResultSet>,
    revision: i64,
}

/// Process-local result-set table behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultSetStore for MemoryStore {
    fn get(&self, key: &ResultSetKey) -> Result<Option<ResultSet>> {
        Ok(self.lock().sets.get(key).cloned())
    }

    fn insert(&self, set: &ResultSet) -> Result<()> {
        let mut t = self.lock();
        if t.sets.contains_key(&set.key) {
            return Err(ResultsError::integrity(format!(
                "result set already exists: {}",
                set.key
            )));
        }
        t.revision = t.revision.max(set.revision);
        t.sets.insert(set.key.clone(), set.clone());
        Ok(())
    }

    fn update(&self, set: &ResultSet) -> Result<()> {
        let mut t = self.lock();
        let Some(slot) = t.sets.get_mut(&set.key) else {
            return Err(ResultsError::not_found(format!(
                "result set not found: {}",
                set.key
            )));
        };
        *slot = set.clone();
        t.revision = t.revision.max(set.revision);
        Ok(())
    }

    fn list(&self, filter: &ResultSetFilter) -> Result<Vec<ResultSet>> {
        let mut out: Vec<ResultSet> = self
            .lock()
            .sets
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.revision);
        Ok(out)
    }

    fn next_revision(&self) -> Result<i64> {
        Ok(self.lock().revision + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultStatus, ResultType};

    fn key(class_id: &str) -> ResultSetKey {
        ResultSetKey::new(class_id, "First Term", "2024/2025", ResultType::Ca)
    }

    #[test]
    fn duplicate_insert_is_an_integrity_error() {
        let store = MemoryStore::new();
        store.insert(&ResultSet::draft(key("JSS1"))).expect("first");
        let e = store
            .insert(&ResultSet::draft(key("JSS1")))
            .expect_err("duplicate");
        assert!(matches!(e, ResultsError::DataIntegrity(_)));
    }

    #[test]
    fn update_of_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let e = store
            .update(&ResultSet::draft(key("JSS2")))
            .expect_err("missing");
        assert!(matches!(e, ResultsError::NotFound(_)));
    }

    #[test]
    fn list_filters_and_orders_by_revision() {
        let store = MemoryStore::new();
        let mut a = ResultSet::draft(key("JSS1"));
        a.revision = 2;
        let mut b = ResultSet::draft(key("JSS2"));
        b.revision = 1;
        b.status = ResultStatus::Approved;
        store.insert(&a).expect("a");
        store.insert(&b).expect("b");
        assert_eq!(store.next_revision().expect("rev"), 3);

        let all = store.list(&ResultSetFilter::default()).expect("all");
        assert_eq!(all[0].key.class_id, "JSS2");
        assert_eq!(all[1].key.class_id, "JSS1");

        let approved = store
            .list(&ResultSetFilter {
                status: Some(ResultStatus::Approved),
                ..Default::default()
            })
            .expect("approved");
        assert_eq!(approved.len(), 1);

        let newer = store
            .list(&ResultSetFilter {
                since_revision: Some(1),
                ..Default::default()
            })
            .expect("newer");
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].key.class_id, "JSS1");
    }
}
