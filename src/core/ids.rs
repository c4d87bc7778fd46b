//! Identifier and timestamp sources for ingested alerts.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use super::model::AlertId;

static ALERT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Source of `receivedAt` timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Produces ids of the form `<prefix>-<millis>-<seq>`.
///
/// The sequence is shared by every generator in the process, so two
/// generators created in the same millisecond still never collide.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn next_id(&self, at: DateTime<Utc>) -> AlertId {
        let seq = ALERT_SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1;
        AlertId::new(format!("{}-{}-{}", self.prefix, at.timestamp_millis(), seq))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("alert")
    }
}
