// Turns inbound gap events into alert records.

use std::sync::Arc;

use serde_json::Value;

use crate::core::ids::{Clock, IdGenerator, SystemClock};
use crate::core::model::{AlertEvent, AlertRecord, IngestError};

pub struct AlertIngestor {
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
}

impl AlertIngestor {
    pub fn new(ids: IdGenerator, clock: Arc<dyn Clock>) -> Self {
        Self { ids, clock }
    }

    /// Assign id and receive time. New records always start unread.
    pub fn on_event(&self, event: AlertEvent) -> AlertRecord {
        let received_at = self.clock.now();
        AlertRecord {
            id: self.ids.next_id(received_at),
            event,
            read: false,
            received_at,
        }
    }

    pub fn on_payload(&self, payload: Value) -> Result<AlertRecord, IngestError> {
        Ok(self.on_event(AlertEvent::from_payload(payload)?))
    }
}

impl Default for AlertIngestor {
    fn default() -> Self {
        Self::new(IdGenerator::default(), Arc::new(SystemClock))
    }
}
