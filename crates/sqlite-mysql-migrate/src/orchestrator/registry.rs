//! Owned store of migration jobs keyed by id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::job::JobRecord;

/// Shared job registry. Only the map itself is locked here; each record
/// guards its own fields.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobRecord>>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobRecord>>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, job: Arc<JobRecord>) {
        self.write().insert(job.id().to_string(), job);
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobRecord>> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of every job, oldest first.
    pub fn ids(&self) -> Vec<String> {
        let mut jobs: Vec<Arc<JobRecord>> = self.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at());
        jobs.iter().map(|j| j.id().to_string()).collect()
    }

    /// Drop terminal jobs whose final status has been polled at least once
    /// and which finished more than `max_age` ago. Returns how many were
    /// removed.
    pub fn purge_observed(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_collectable(cutoff));
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("Purged {} finished jobs", removed);
        }
        removed
    }
}
