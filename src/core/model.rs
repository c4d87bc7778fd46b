// Alert model types: inbound gap events and the records built from them.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of gap the producer detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "gap_1")]
    Gap1,
    #[serde(rename = "gap_2")]
    Gap2,
}

impl AlertType {
    /// Get the display name for this alert type
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gap1 => "Gap 1",
            Self::Gap2 => "Gap 2",
        }
    }

    /// Get a description of what this alert type signals
    pub fn description(&self) -> &'static str {
        match self {
            Self::Gap1 => "Value diverged from its baseline beyond the first threshold",
            Self::Gap2 => "Value diverged from its baseline beyond the second threshold",
        }
    }

    pub fn all() -> &'static [AlertType] {
        &[Self::Gap1, Self::Gap2]
    }
}

/// Engine-assigned alert identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlertId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Gap event as delivered by the inbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub instrument_id: i64,
    pub instrument_name: String,
    pub alert_type: AlertType,
    pub time_slot: String,
    pub current_value: f64,
    /// Display only; nothing is computed from it.
    #[serde(default)]
    pub baseline_value: Option<f64>,
    pub deviation_percent: f64,
    #[serde(default)]
    pub baseline_date: Option<NaiveDate>,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed alert payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl AlertEvent {
    /// Decode a raw channel payload. Anything that does not have the
    /// expected shape is rejected.
    pub fn from_payload(payload: Value) -> Result<Self, IngestError> {
        Ok(serde_json::from_value(payload)?)
    }
}

/// An ingested alert. Only `read` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: AlertId,
    #[serde(flatten)]
    pub event: AlertEvent,
    #[serde(default)]
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

impl AlertRecord {
    /// One-line label, e.g. `Gap 1 · ACME 09:30 · +12.50%`
    pub fn summary(&self) -> String {
        format!(
            "{} · {} {} · {:+.2}%",
            self.event.alert_type.display_name(),
            self.event.instrument_name,
            self.event.time_slot,
            self.event.deviation_percent
        )
    }
}
