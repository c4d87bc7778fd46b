use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::{
    alerts::AlertEngine,
    channel::{ChannelMessage, EventBus},
    config::{ConfigManager, Settings},
    model::AlertId,
    store::FileStore,
};

/// Commands accepted on stdin
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Active,
    History,
    Unread,
    Dismiss(AlertId),
    Read(AlertId),
    ReadAll,
    Clear,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();
        match (name, arg) {
            ("active", None) => Ok(Self::Active),
            ("history", None) => Ok(Self::History),
            ("unread", None) => Ok(Self::Unread),
            ("dismiss", Some(id)) => Ok(Self::Dismiss(AlertId::from(id))),
            ("read", Some(id)) => Ok(Self::Read(AlertId::from(id))),
            ("read-all", None) => Ok(Self::ReadAll),
            ("clear", None) => Ok(Self::Clear),
            ("quit", None) => Ok(Self::Quit),
            _ => Err(format!("Unknown command: {}", line)),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Input {
    Publish(ChannelMessage),
    Command(Command),
}

/// A JSON object is either a full channel message or a bare payload for
/// `default_event`; anything else is a command.
fn parse_line(line: &str, default_event: &str) -> Result<Input, String> {
    if !line.starts_with('{') {
        return line.parse().map(Input::Command);
    }
    let value: Value = serde_json::from_str(line).map_err(|e| format!("Invalid JSON: {}", e))?;
    let is_message =
        value.get("event").is_some_and(Value::is_string) && value.get("payload").is_some();
    if is_message {
        let message = serde_json::from_value(value).map_err(|e| format!("Invalid message: {}", e))?;
        Ok(Input::Publish(message))
    } else {
        Ok(Input::Publish(ChannelMessage {
            event: default_event.to_string(),
            payload: value,
        }))
    }
}

fn execute(engine: &AlertEngine, command: Command) -> Value {
    match command {
        Command::Active => json!(engine.active_alerts()),
        Command::History => json!(engine.history_alerts()),
        Command::Unread => json!({ "unread": engine.unread_count() }),
        Command::Dismiss(id) => {
            let dismissed = engine.dismiss(&id);
            json!({ "id": id, "dismissed": dismissed })
        }
        Command::Read(id) => {
            let changed = engine.mark_read(&id);
            json!({ "id": id, "read": changed })
        }
        Command::ReadAll => {
            engine.mark_all_read();
            json!({ "unread": engine.unread_count() })
        }
        Command::Clear => {
            engine.clear_history();
            json!({ "history": 0 })
        }
        Command::Quit => Value::Null,
    }
}

async fn serve(settings: Settings) -> io::Result<()> {
    let store = Arc::new(FileStore::new(settings.data_dir.clone()));
    let bus = EventBus::new(settings.channel_capacity);
    let mut engine = AlertEngine::new(settings.alerts.clone(), store, bus.clone());
    engine.start().map_err(io::Error::other)?;
    info!(
        "History in {:?}, {} alerts ({} unread)",
        settings.data_dir,
        engine.history_alerts().len(),
        engine.unread_count()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, &engine.config().event_name) {
            Ok(Input::Publish(message)) => {
                let reached = bus.send(message);
                debug!("Published to {} subscribers", reached);
                // Let the ingest task pick it up before the next line.
                tokio::task::yield_now().await;
            }
            Ok(Input::Command(Command::Quit)) => break,
            Ok(Input::Command(command)) => println!("{}", execute(&engine, command)),
            Err(e) => warn!("{}", e),
        }
    }

    engine.stop();
    Ok(())
}

/// Headless runner: alert payloads and commands on stdin, JSON on stdout.
pub fn run() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir = std::env::var_os("GAP_ALERTS_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = ConfigManager::new(config_dir).load();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(settings))
}
