// Gap alert engine.
//
// Architecture:
// - ingest.rs: Builds alert records from inbound gap events
// - active.rs: Bounded on-screen alert set and auto-dismiss timers
// - history.rs: Capped, persisted history with read/unread tracking
// - engine.rs: Facade tying the channel, active set and history together

pub mod active;
pub mod engine;
pub mod history;
pub mod ingest;

pub use engine::{AlertEngine, AlertEngineConfig, EngineError, HISTORY_LIMIT};
