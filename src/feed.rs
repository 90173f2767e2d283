//! Consumer loop: drains watcher events into the store

use crate::parser::LogEvent;
use crate::sound::{Cue, SoundPlayer};
use crate::store::{Store, ToolCall};
use log::{debug, info};
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Applies every event until the stream closes; returns how many were consumed
pub fn consume(events: Receiver<LogEvent>, store: &Store, sound: &dyn SoundPlayer) -> u64 {
    let mut consumed = 0u64;
    for event in events {
        if let Some(call) = ToolCall::from_event(&event) {
            store.record_tool_call(call);
        }
        let agent = event.agent.clone();
        let effect = store.apply_event(event);
        if effect.new_agent {
            debug!("New agent seen: {}", agent);
            sound.play(Cue::AgentSpawned);
        }
        consumed += 1;
    }
    consumed
}

pub fn spawn_consumer(
    events: Receiver<LogEvent>,
    store: Arc<Store>,
    sound: Arc<dyn SoundPlayer>,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("ocwatch-consumer".to_string())
        .spawn(move || {
            let consumed = consume(events, &store, sound.as_ref());
            info!("Event stream closed after {} events", consumed);
            consumed
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::sound::testing::Recorder;
    use std::sync::mpsc;

    fn event(fields: &str) -> LogEvent {
        parse_line(&format!("INFO 2026-01-31T10:05:40 +0ms service=llm {fields}")).unwrap()
    }

    #[test]
    fn drains_until_closed_and_cues_new_agents() {
        let (tx, rx) = mpsc::sync_channel(8);
        let store = Arc::new(Store::new());
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_consumer(rx, store.clone(), recorder.clone()).unwrap();

        tx.send(event("sessionID=s1 agent=build modelID=m")).unwrap();
        tx.send(event("sessionID=s1 agent=build mode=all tool=read")).unwrap();
        tx.send(event("sessionID=s1 agent=oracle")).unwrap();
        tx.send(event("modelID=m")).unwrap();
        drop(tx);

        assert_eq!(handle.join().unwrap(), 4);
        assert_eq!(recorder.played.lock().len(), 2);
        assert_eq!(store.model_calls()["m"], 2);
        assert_eq!(store.agents(Some("s1")).len(), 2);
        let calls = store.tool_calls(Some("s1"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read");
        assert_eq!(store.recent_logs().len(), 4);
    }
}
