use super::*;
use std::collections::VecDeque;
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionOpened {
        device_addr: String,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    PromptChanged {
        prompt: String,
    },
    CommandCompleted {
        command: String,
        intent: CommandIntent,
        outcome: String,
        #[serde(default)]
        matched: Option<String>,
        content: String,
        elapsed_ms: u64,
    },
    ProbeFailed {
        consecutive_failures: u32,
        reason: String,
    },
    Reconnected {
        device_addr: String,
        prompt: String,
    },
    SessionClosed {
        reason: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder, cheap to clone and shared across reconnects.
///
/// Keepalive sessions can live for days, so a recorder may be capped with
/// [`with_max_entries`](Self::with_max_entries); the oldest entries are
/// dropped first.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    max_entries: Option<usize>,
    entries: Arc<StdMutex<VecDeque<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create an unbounded recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            max_entries: None,
            entries: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    /// Keep at most `max` entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<SessionRecordEntry>>, ConnectError> {
        self.entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))
    }

    /// Record a key-level event. Ignored when recording is off.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut entries = self.lock()?;
        if let Some(max) = self.max_entries {
            while entries.len() >= max {
                entries.pop_front();
            }
        }
        entries.push_back(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a raw shell chunk; only kept at [`SessionRecordLevel::Full`].
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    /// Snapshot of events without timestamps.
    pub fn events(&self) -> Result<Vec<SessionEvent>, ConnectError> {
        Ok(self.entries()?.into_iter().map(|e| e.event).collect())
    }

    /// Number of entries currently held.
    pub fn len(&self) -> Result<usize, ConnectError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ConnectError> {
        Ok(self.lock()?.is_empty())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Export records as JSONL, one entry per line.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let lines = self
            .entries()?
            .iter()
            .map(|entry| {
                serde_json::to_string(entry).map_err(|e| {
                    ConnectError::InternalServerError(format!("record encode error: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }

    /// Restore an unbounded, full-level recorder from JSONL. Blank lines are
    /// skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let parsed = jsonl
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<SessionRecordEntry>(line).map_err(|e| {
                    ConnectError::InternalServerError(format!("record decode error: {e}"))
                })
            })
            .collect::<Result<VecDeque<_>, _>>()?;

        let recorder = Self::new(SessionRecordLevel::Full);
        *recorder.lock()? = parsed;
        Ok(recorder)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{SessionEvent, SessionRecordLevel, SessionRecorder};
    use crate::session::{CommandIntent, SessionState};

    #[test]
    fn jsonl_export_restores_events() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::SessionOpened {
                device_addr: "admin@10.0.0.1:22".into(),
            })
            .expect("record");
        recorder
            .record_event(SessionEvent::CommandCompleted {
                command: "show foo".into(),
                intent: CommandIntent::Read,
                outcome: "device_error".into(),
                matched: Some("% Invalid input detected".into()),
                content: "% Invalid input detected".into(),
                elapsed_ms: 12,
            })
            .expect("record");

        let jsonl = recorder.to_jsonl().expect("encode");
        assert!(jsonl.contains("\"kind\":\"command_completed\""));

        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode");
        assert_eq!(restored.events().expect("events"), recorder.events().expect("events"));
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder.record_raw_chunk("router#".into()).expect("raw");
        recorder
            .record_event(SessionEvent::StateChanged {
                from: SessionState::Ready,
                to: SessionState::Busy,
            })
            .expect("event");

        let events = recorder.events().expect("events");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::StateChanged { .. }));
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder
            .record_event(SessionEvent::SessionClosed {
                reason: "test".into(),
            })
            .expect("event");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn capped_recorder_drops_oldest_entries() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly).with_max_entries(2);
        for prompt in ["r1>", "r1#", "r1(config)#"] {
            recorder
                .record_event(SessionEvent::PromptChanged {
                    prompt: prompt.into(),
                })
                .expect("event");
        }

        assert_eq!(recorder.len().expect("len"), 2);
        let prompts: Vec<String> = recorder
            .events()
            .expect("events")
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PromptChanged { prompt } => Some(prompt),
                _ => None,
            })
            .collect();
        assert_eq!(prompts, vec!["r1#", "r1(config)#"]);
    }

    #[test]
    fn clear_and_empty_jsonl() {
        let recorder = SessionRecorder::from_jsonl("\n  \n").expect("empty input");
        assert!(recorder.entries().expect("entries").is_empty());

        recorder.record_raw_chunk("x".into()).expect("raw");
        recorder.clear().expect("clear");
        assert!(recorder.is_empty().expect("is_empty"));
    }
}
