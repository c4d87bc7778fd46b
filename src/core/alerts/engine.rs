// Alert engine - owns the channel subscription, fans records out to the
// active set and history, and manages auto-dismiss timers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::active::{ActiveAlertSet, DismissTimers};
use super::history::HistoryLog;
use super::ingest::AlertIngestor;
use crate::core::channel::EventBus;
use crate::core::model::{AlertEvent, AlertId, AlertRecord, IngestError};
use crate::core::store::PersistentStore;

/// Default cap on the persisted history
pub const HISTORY_LIMIT: usize = 50;

/// Alert engine configuration - persisted in settings.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEngineConfig {
    /// Maximum number of simultaneous transient alerts
    #[serde(default = "default_max_visible")]
    pub max_visible: usize,
    /// Auto-dismiss delay in milliseconds, 0 disables
    #[serde(default = "default_auto_dismiss_ms")]
    pub auto_dismiss_ms: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Store key holding the serialized history
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Channel event name carrying gap alerts
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

fn default_max_visible() -> usize {
    5
}

fn default_auto_dismiss_ms() -> u64 {
    8000
}

fn default_history_limit() -> usize {
    HISTORY_LIMIT
}

fn default_storage_key() -> String {
    "gap_alert_history".to_string()
}

fn default_event_name() -> String {
    "gap_alert".to_string()
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            max_visible: default_max_visible(),
            auto_dismiss_ms: default_auto_dismiss_ms(),
            history_limit: default_history_limit(),
            storage_key: default_storage_key(),
            event_name: default_event_name(),
        }
    }
}

impl AlertEngineConfig {
    pub fn auto_dismiss(&self) -> Option<Duration> {
        (self.auto_dismiss_ms > 0).then(|| Duration::from_millis(self.auto_dismiss_ms))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("alert engine must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Everything mutated by ingestion, timers and user commands.
struct EngineState {
    active: ActiveAlertSet,
    history: HistoryLog,
    timers: DismissTimers,
}

impl EngineState {
    /// Returns true only for the call that actually took the record off
    /// screen. The record is always left read.
    fn dismiss(&mut self, id: &AlertId) -> bool {
        self.timers.cancel(id);
        let removed = self.active.remove(id).is_some();
        self.history.mark_read(id);
        removed
    }

    /// Timer fired for `id`. A timer that was cancelled after waking but
    /// before taking the lock does nothing.
    fn expire(&mut self, id: &AlertId) {
        if !self.timers.complete(id) {
            debug!("Ignoring cancelled timer for alert {}", id);
            return;
        }
        if self.dismiss(id) {
            debug!("Auto-dismissed alert {}", id);
        }
    }

    fn mark_read(&mut self, id: &AlertId) -> bool {
        self.active.mark_read(id);
        self.history.mark_read(id)
    }
}

type SharedState = Arc<Mutex<EngineState>>;

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ingestion path shared by the subscription task and direct callers.
#[derive(Clone)]
struct Pipeline {
    ingestor: Arc<AlertIngestor>,
    state: SharedState,
    auto_dismiss: Option<Duration>,
}

impl Pipeline {
    fn ingest(&self, event: AlertEvent) -> AlertRecord {
        self.insert(self.ingestor.on_event(event))
    }

    fn ingest_payload(&self, payload: Value) -> Result<AlertRecord, IngestError> {
        match self.ingestor.on_payload(payload) {
            Ok(record) => Ok(self.insert(record)),
            Err(e) => {
                warn!("Rejected alert event: {}", e);
                Err(e)
            }
        }
    }

    fn insert(&self, record: AlertRecord) -> AlertRecord {
        let mut state = lock(&self.state);

        for evicted in state.active.push(record.clone()) {
            debug!("Alert {} pushed out of the active set", evicted.id);
        }
        if let Some(delay) = self.auto_dismiss {
            self.schedule_dismiss(&mut state, record.id.clone(), delay);
        }
        state.history.append(record.clone());

        info!("Gap alert {}: {}", record.id, record.summary());
        record
    }

    fn schedule_dismiss(&self, state: &mut EngineState, id: AlertId, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime, alert {} will not auto-dismiss", id);
            return;
        };

        let shared = Arc::downgrade(&self.state);
        let timer_id = id.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                lock(&shared).expire(&timer_id);
            }
        });
        state.timers.schedule(id, task.abort_handle());
    }
}

/// Public contract consumed by the presentation layer.
pub struct AlertEngine {
    config: AlertEngineConfig,
    pipeline: Pipeline,
    bus: EventBus,
    ingest_task: Option<JoinHandle<()>>,
}

impl AlertEngine {
    /// Build an engine, seeding history from `store`.
    pub fn new(config: AlertEngineConfig, store: Arc<dyn PersistentStore>, bus: EventBus) -> Self {
        Self::with_ingestor(config, store, bus, AlertIngestor::default())
    }

    pub fn with_ingestor(
        config: AlertEngineConfig,
        store: Arc<dyn PersistentStore>,
        bus: EventBus,
        ingestor: AlertIngestor,
    ) -> Self {
        let history = HistoryLog::load(store, config.storage_key.clone(), config.history_limit);
        let state = EngineState {
            active: ActiveAlertSet::new(config.max_visible),
            history,
            timers: DismissTimers::new(),
        };
        let pipeline = Pipeline {
            ingestor: Arc::new(ingestor),
            state: Arc::new(Mutex::new(state)),
            auto_dismiss: config.auto_dismiss(),
        };
        Self {
            config,
            pipeline,
            bus,
            ingest_task: None,
        }
    }

    pub fn config(&self) -> &AlertEngineConfig {
        &self.config
    }

    /// Subscribe to the alert channel and begin ingesting. No-op if already
    /// running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            debug!("Alert engine already running");
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut subscription = self.bus.subscribe(&self.config.event_name);
        let pipeline = self.pipeline.clone();
        self.ingest_task = Some(runtime.spawn(async move {
            while let Some(payload) = subscription.next().await {
                // Rejections are logged by the pipeline.
                let _ = pipeline.ingest_payload(payload);
            }
            info!("Alert channel closed, ingestion stopped");
        }));

        info!("Alert engine listening for '{}'", self.config.event_name);
        Ok(())
    }

    /// Unsubscribe and cancel every pending auto-dismiss timer. Returns the
    /// number of timers cancelled.
    pub fn stop(&mut self) -> usize {
        if let Some(task) = self.ingest_task.take() {
            task.abort();
            info!("Alert engine stopped");
        }
        let cancelled = lock(&self.pipeline.state).timers.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending auto-dismiss timers", cancelled);
        }
        cancelled
    }

    pub fn is_running(&self) -> bool {
        self.ingest_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn ingest(&self, event: AlertEvent) -> AlertRecord {
        self.pipeline.ingest(event)
    }

    pub fn ingest_payload(&self, payload: Value) -> Result<AlertRecord, IngestError> {
        self.pipeline.ingest_payload(payload)
    }

    pub fn active_alerts(&self) -> Vec<AlertRecord> {
        lock(&self.pipeline.state).active.records()
    }

    pub fn history_alerts(&self) -> Vec<AlertRecord> {
        lock(&self.pipeline.state).history.records().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.pipeline.state).history.unread_count()
    }

    /// Take an alert off screen and mark it read. Unknown ids are ignored.
    pub fn dismiss(&self, id: &AlertId) -> bool {
        lock(&self.pipeline.state).dismiss(id)
    }

    /// Mark read without dismissing.
    pub fn mark_read(&self, id: &AlertId) -> bool {
        lock(&self.pipeline.state).mark_read(id)
    }

    pub fn mark_all_read(&self) {
        let mut state = lock(&self.pipeline.state);
        state.active.mark_all_read();
        state.history.mark_all_read();
    }

    /// Drop all history. Alerts currently on screen stay until dismissed.
    pub fn clear_history(&self) {
        lock(&self.pipeline.state).history.clear();
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.pipeline.state).timers.len()
    }

    pub fn has_pending_timer(&self, id: &AlertId) -> bool {
        lock(&self.pipeline.state).timers.is_pending(id)
    }
}

impl Drop for AlertEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{FixedClock, IdGenerator};
    use crate::core::model::fixtures::{sample_event, sample_payload};
    use crate::core::store::MemoryStore;
    use serde_json::json;

    fn engine(max_visible: usize, auto_dismiss_ms: u64) -> (Arc<MemoryStore>, AlertEngine) {
        let store = Arc::new(MemoryStore::new());
        let config = AlertEngineConfig {
            max_visible,
            auto_dismiss_ms,
            ..AlertEngineConfig::default()
        };
        let engine = AlertEngine::new(config, store.clone(), EventBus::new(16));
        (store, engine)
    }

    /// Let spawned tasks run; the paused clock only advances once every
    /// task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: AlertEngineConfig = serde_json::from_str(r#"{"maxVisible": 3}"#).unwrap();
        assert_eq!(config.max_visible, 3);
        assert_eq!(config.auto_dismiss_ms, 8000);
        assert_eq!(config.history_limit, HISTORY_LIMIT);
        assert_eq!(config.event_name, "gap_alert");

        let disabled = AlertEngineConfig {
            auto_dismiss_ms: 0,
            ..config
        };
        assert_eq!(disabled.auto_dismiss(), None);
    }

    #[test]
    fn test_custom_ingestor_stamps_records() {
        let now = chrono::DateTime::from_timestamp(1_790_000_000, 0).unwrap();
        let ingestor = AlertIngestor::new(IdGenerator::new("gap"), Arc::new(FixedClock(now)));
        let engine = AlertEngine::with_ingestor(
            AlertEngineConfig::default(),
            Arc::new(MemoryStore::new()),
            EventBus::default(),
            ingestor,
        );

        let record = engine.ingest(sample_event(1));
        assert_eq!(record.received_at, now);
        assert!(record.id.as_str().starts_with("gap-"));
        assert_eq!(engine.history_alerts()[0], record);
    }

    #[test]
    fn test_ingest_without_runtime_skips_timer() {
        let (_, engine) = engine(5, 1000);
        let record = engine.ingest(sample_event(1));

        assert_eq!(engine.active_alerts()[0].id, record.id);
        assert_eq!(engine.pending_timers(), 0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let (_, mut engine) = engine(5, 0);
        assert!(matches!(engine.start(), Err(EngineError::NoRuntime)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_dismiss_twice_is_idempotent() {
        let (store, engine) = engine(5, 0);
        let record = engine.ingest(sample_event(1));

        assert!(engine.dismiss(&record.id));
        let active = engine.active_alerts();
        let history = engine.history_alerts();
        let writes = store.writes();

        assert!(!engine.dismiss(&record.id));
        assert_eq!(engine.active_alerts(), active);
        assert_eq!(engine.history_alerts(), history);
        assert_eq!(store.writes(), writes);
    }

    #[test]
    fn test_dismiss_unknown_id_is_noop() {
        let (_, engine) = engine(5, 0);
        engine.ingest(sample_event(1));
        assert!(!engine.dismiss(&AlertId::from("nope")));
        assert!(!engine.mark_read(&AlertId::from("nope")));
        assert_eq!(engine.unread_count(), 1);
    }

    #[test]
    fn test_mark_read_keeps_alert_active() {
        let (_, engine) = engine(5, 0);
        let record = engine.ingest(sample_event(1));

        assert!(engine.mark_read(&record.id));
        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert!(active[0].read);
        assert!(engine.history_alerts()[0].read);
        assert_eq!(engine.unread_count(), 0);
    }

    #[test]
    fn test_evicted_alert_keeps_history_state() {
        let (_, engine) = engine(1, 0);
        let first = engine.ingest(sample_event(1));
        engine.mark_read(&first.id);
        engine.ingest(sample_event(2));

        assert_eq!(engine.active_alerts().len(), 1);
        let history = engine.history_alerts();
        assert_eq!(history.len(), 2);
        assert!(history[1].read);
        assert!(!history[0].read);
    }

    #[test]
    fn test_clear_history_leaves_active() {
        let (_, engine) = engine(5, 0);
        let record = engine.ingest(sample_event(1));
        engine.clear_history();

        assert!(engine.history_alerts().is_empty());
        assert_eq!(engine.active_alerts().len(), 1);
        assert!(engine.dismiss(&record.id));
        assert_eq!(engine.unread_count(), 0);
    }

    #[test]
    fn test_malformed_payload_creates_nothing() {
        let (store, engine) = engine(5, 0);
        assert!(engine.ingest_payload(json!({"instrumentName": "X"})).is_err());
        assert!(engine.active_alerts().is_empty());
        assert!(engine.history_alerts().is_empty());
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_history_seeded_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let config = AlertEngineConfig::default();
            let engine = AlertEngine::new(config, store.clone(), EventBus::default());
            engine.ingest(sample_event(1));
            engine.ingest(sample_event(2));
        }
        let engine = AlertEngine::new(AlertEngineConfig::default(), store, EventBus::default());
        assert_eq!(engine.history_alerts().len(), 2);
        assert_eq!(engine.unread_count(), 2);
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_then_dismiss_single_transition() {
        let (store, engine) = engine(5, 1000);
        let record = engine.ingest(sample_event(1));
        assert!(engine.has_pending_timer(&record.id));

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert!(engine.active_alerts().is_empty());
        assert_eq!(engine.pending_timers(), 0);
        let writes = store.writes();

        assert!(!engine.dismiss(&record.id));
        assert!(engine.history_alerts()[0].read);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_then_timer_single_transition() {
        let (store, engine) = engine(5, 1000);
        let record = engine.ingest(sample_event(1));

        assert!(engine.dismiss(&record.id));
        assert_eq!(engine.pending_timers(), 0);
        let writes = store.writes();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(engine.active_alerts().is_empty());
        assert!(engine.history_alerts()[0].read);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_timer_fires_harmlessly() {
        let (_, engine) = engine(1, 1000);
        let first = engine.ingest(sample_event(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = engine.ingest(sample_event(2));
        assert_eq!(engine.pending_timers(), 2);

        // First timer fires while its record is already off screen.
        tokio::time::sleep(Duration::from_millis(501)).await;
        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(engine.pending_timers(), 1);
        assert!(engine
            .history_alerts()
            .iter()
            .any(|r| r.id == first.id && r.read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timers() {
        let (_, mut engine) = engine(5, 1000);
        engine.start().unwrap();
        engine.ingest(sample_event(1));
        engine.ingest(sample_event(2));

        assert_eq!(engine.stop(), 2);
        assert!(!engine.is_running());

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(engine.active_alerts().len(), 2);
        assert_eq!(engine.unread_count(), 2);
        assert_eq!(engine.stop(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_woken_timer_does_nothing_after_stop() {
        let (store, mut engine) = engine(5, 20);
        let record = engine.ingest(sample_event(1));
        let writes = store.writes();
        {
            // Hold the state so the timer wakes and queues on the lock.
            let mut state = lock(&engine.pipeline.state);
            std::thread::sleep(Duration::from_millis(200));
            assert_eq!(state.timers.cancel_all(), 1);
        }
        assert_eq!(engine.stop(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, record.id);
        assert!(!engine.history_alerts()[0].read);
        assert_eq!(engine.unread_count(), 1);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(16);
        let config = AlertEngineConfig {
            auto_dismiss_ms: 0,
            ..AlertEngineConfig::default()
        };
        let mut engine = AlertEngine::new(config, store, bus.clone());

        bus.publish("gap_alert", sample_payload(1));
        settle().await;
        assert!(engine.history_alerts().is_empty());

        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish("gap_alert", sample_payload(2));
        bus.publish("gap_alert", json!({"garbage": true}));
        bus.publish("other_event", sample_payload(3));
        settle().await;

        let history = engine.history_alerts();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.instrument_id, 2);

        engine.stop();
        settle().await;
        bus.publish("gap_alert", sample_payload(4));
        settle().await;
        assert_eq!(engine.history_alerts().len(), 1);
    }
}
