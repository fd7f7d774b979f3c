//! Registry of outstanding remote jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobHandle;

/// One submitted, not yet terminal, remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobRecord {
    pub handle: JobHandle,
    pub submitted_at: DateTime<Utc>,
    /// Earliest time the next poll is worthwhile (from `Retry-After`).
    /// In-memory only.
    #[serde(skip)]
    pub next_poll_at: Option<DateTime<Utc>>,
}

impl ActiveJobRecord {
    pub fn new(handle: JobHandle, submitted_at: DateTime<Utc>) -> Self {
        Self {
            handle,
            submitted_at,
            next_poll_at: None,
        }
    }

    /// Wall-clock time since submission (zero if the clock went backwards).
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).max(Duration::zero())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_poll_at.is_none_or(|at| now >= at)
    }
}

/// In-memory set of active jobs, kept in submission order.
///
/// This is the source of truth for the concurrency cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveJobSet {
    records: Vec<ActiveJobRecord>,
}

impl ActiveJobSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records; duplicate handles keep the first entry.
    pub fn from_records(records: impl IntoIterator<Item = ActiveJobRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            if !set.contains(&record.handle) {
                set.records.push(record);
            }
        }
        set
    }

    /// Register a freshly submitted job.
    pub fn insert(&mut self, handle: JobHandle, submitted_at: DateTime<Utc>) -> DomainResult<()> {
        if self.contains(&handle) {
            return Err(DomainError::conflict(format!("handle already active: {handle}")));
        }
        self.records.push(ActiveJobRecord::new(handle, submitted_at));
        Ok(())
    }

    pub fn remove(&mut self, handle: &JobHandle) -> Option<ActiveJobRecord> {
        let idx = self.records.iter().position(|r| &r.handle == handle)?;
        Some(self.records.remove(idx))
    }

    pub fn get(&self, handle: &JobHandle) -> Option<&ActiveJobRecord> {
        self.records.iter().find(|r| &r.handle == handle)
    }

    pub fn contains(&self, handle: &JobHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Postpone polling of `handle` until `until`.
    pub fn defer(&mut self, handle: &JobHandle, until: DateTime<Utc>) {
        if let Some(record) = self.records.iter_mut().find(|r| &r.handle == handle) {
            record.next_poll_at = Some(until);
        }
    }

    pub fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.records.len() < max_concurrent
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ActiveJobRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(s: &str) -> JobHandle {
        JobHandle::new(s).unwrap()
    }

    #[test]
    fn insert_rejects_duplicate_handles() {
        let mut set = ActiveJobSet::new();
        let now = Utc::now();
        set.insert(handle("h1"), now).unwrap();
        assert!(matches!(
            set.insert(handle("h1"), now),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn keeps_submission_order_and_removes_by_handle() {
        let mut set = ActiveJobSet::new();
        let now = Utc::now();
        for h in ["a", "b", "c"] {
            set.insert(handle(h), now).unwrap();
        }
        assert!(set.remove(&handle("b")).is_some());
        assert!(set.remove(&handle("b")).is_none());
        let order: Vec<_> = set.records().iter().map(|r| r.handle.clone()).collect();
        assert_eq!(order, vec![handle("a"), handle("c")]);
    }

    #[test]
    fn capacity_is_strict() {
        let mut set = ActiveJobSet::new();
        assert!(set.has_capacity(1));
        set.insert(handle("a"), Utc::now()).unwrap();
        assert!(!set.has_capacity(1));
        assert!(set.has_capacity(2));
    }

    #[test]
    fn deferral_controls_due_time() {
        let mut set = ActiveJobSet::new();
        let now = Utc::now();
        set.insert(handle("a"), now).unwrap();
        assert!(set.get(&handle("a")).unwrap().is_due(now));

        set.defer(&handle("a"), now + Duration::seconds(5));
        let record = set.get(&handle("a")).unwrap();
        assert!(!record.is_due(now));
        assert!(record.is_due(now + Duration::seconds(5)));
    }

    #[test]
    fn snapshot_form_omits_poll_hint() {
        let mut record = ActiveJobRecord::new(handle("h1"), Utc::now());
        record.next_poll_at = Some(Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("submittedAt").is_some());
        assert!(value.get("nextPollAt").is_none());

        let restored: ActiveJobRecord = serde_json::from_value(value).unwrap();
        assert_eq!(restored.next_poll_at, None);
    }

    #[test]
    fn from_records_drops_duplicates() {
        let now = Utc::now();
        let set = ActiveJobSet::from_records(vec![
            ActiveJobRecord::new(handle("a"), now),
            ActiveJobRecord::new(handle("a"), now - Duration::seconds(1)),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&handle("a")).unwrap().submitted_at, now);
    }
}
