//! Capped, durable alert history backing the notification center.
//!
//! Every mutation rewrites the whole log under a single key. Storage is
//! best-effort: failed reads start from an empty log and failed writes are
//! logged while the in-memory log stays authoritative.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use crate::core::model::{AlertId, AlertRecord};
use crate::core::store::{PersistentStore, StoreError};

pub struct HistoryLog {
    /// Newest first
    records: Vec<AlertRecord>,
    limit: usize,
    key: String,
    store: Arc<dyn PersistentStore>,
}

impl HistoryLog {
    /// Seed the log from `store`.
    ///
    /// Missing, unreadable or non-array payloads give an empty log. Entries
    /// that fail to decode are skipped, duplicate ids keep the newest.
    pub fn load(store: Arc<dyn PersistentStore>, key: impl Into<String>, limit: usize) -> Self {
        let key = key.into();
        let records = match store.get(&key) {
            Ok(Some(raw)) => decode_history(&raw, &key),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not read alert history '{}': {}", key, e);
                Vec::new()
            }
        };

        let mut log = Self {
            records,
            limit,
            key,
            store,
        };
        log.records.truncate(log.limit);
        debug!("Loaded {} alerts from history '{}'", log.records.len(), log.key);
        log
    }

    /// Prepend `record`, replacing any entry with the same id, then trim
    /// and persist.
    pub fn append(&mut self, record: AlertRecord) {
        self.records.retain(|r| r.id != record.id);
        self.records.insert(0, record);
        self.records.truncate(self.limit);
        self.persist();
    }

    /// Returns true if the record existed and was unread.
    pub fn mark_read(&mut self, id: &AlertId) -> bool {
        let changed = match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) if !record.read => {
                record.read = true;
                true
            }
            _ => false,
        };
        if changed {
            self.persist();
        }
        changed
    }

    /// Mark every record read with a single write.
    pub fn mark_all_read(&mut self) {
        for record in &mut self.records {
            record.read = true;
        }
        self.persist();
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.persist();
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    pub fn get(&self, id: &AlertId) -> Option<&AlertRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn records(&self) -> &[AlertRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) {
        if let Err(e) = self.write() {
            warn!("Failed to persist alert history '{}': {}", self.key, e);
        }
    }

    fn write(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string(&self.records)?;
        self.store.set(&self.key, &content)
    }
}

fn decode_history(raw: &str, key: &str) -> Vec<AlertRecord> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            warn!("Alert history '{}' is not a list, starting empty", key);
            return Vec::new();
        }
        Err(e) => {
            warn!("Alert history '{}' is corrupt, starting empty: {}", key, e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<AlertRecord>(entry) {
            Ok(record) => {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }
            Err(e) => warn!("Skipping unreadable entry in alert history '{}': {}", key, e),
        }
    }
    records
}
