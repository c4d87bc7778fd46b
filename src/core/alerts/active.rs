// Transient alerts currently eligible for on-screen display, plus their
// auto-dismiss timers.

use std::collections::{HashMap, VecDeque};

use tokio::task::AbortHandle;

use crate::core::model::{AlertId, AlertRecord};

/// Newest-first, bounded by `max_visible`.
#[derive(Debug, Default)]
pub struct ActiveAlertSet {
    records: VecDeque<AlertRecord>,
    max_visible: usize,
}

impl ActiveAlertSet {
    pub fn new(max_visible: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_visible),
            max_visible,
        }
    }

    /// Prepend a record and return whatever fell off the tail.
    ///
    /// Eviction only ends display membership: history and read state are
    /// untouched and any timer for an evicted id is left to fire as a no-op.
    pub fn push(&mut self, record: AlertRecord) -> Vec<AlertRecord> {
        self.records.push_front(record);
        let mut evicted = Vec::new();
        while self.records.len() > self.max_visible {
            if let Some(oldest) = self.records.pop_back() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Remove by id. Absent ids are a no-op.
    pub fn remove(&mut self, id: &AlertId) -> Option<AlertRecord> {
        let index = self.records.iter().position(|r| &r.id == id)?;
        self.records.remove(index)
    }

    pub fn mark_read(&mut self, id: &AlertId) {
        if let Some(record) = self.records.iter_mut().find(|r| &r.id == id) {
            record.read = true;
        }
    }

    pub fn mark_all_read(&mut self) {
        for record in &mut self.records {
            record.read = true;
        }
    }

    pub fn contains(&self, id: &AlertId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pending auto-dismiss tasks, at most one per id.
#[derive(Debug, Default)]
pub struct DismissTimers {
    pending: HashMap<AlertId, AbortHandle>,
}

impl DismissTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the task for `id`, aborting any task it replaces.
    pub fn schedule(&mut self, id: AlertId, handle: AbortHandle) {
        if let Some(previous) = self.pending.insert(id, handle) {
            previous.abort();
        }
    }

    /// Abort the pending task for `id`. Returns false if there was none.
    pub fn cancel(&mut self, id: &AlertId) -> bool {
        match self.pending.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the handle of a task that has fired. Returns false if the
    /// timer was cancelled in the meantime, in which case it must not act.
    pub fn complete(&mut self, id: &AlertId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
        count
    }

    pub fn is_pending(&self, id: &AlertId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
