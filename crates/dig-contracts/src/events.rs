//! Session event log: one compact JSON object per line in `events.jsonl`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    AttachmentsRejected,
    GenerationStarted,
    GenerationSucceeded,
    GenerationFailed,
    GenerationDiscarded,
    GenerationRecorded,
    RecordFailed,
    ChatReplied,
    ChatFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::AttachmentsRejected => "attachments_rejected",
            Self::GenerationStarted => "generation_started",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationFailed => "generation_failed",
            Self::GenerationDiscarded => "generation_discarded",
            Self::GenerationRecorded => "generation_recorded",
            Self::RecordFailed => "record_failed",
            Self::ChatReplied => "chat_replied",
            Self::ChatFailed => "chat_failed",
        }
    }
}

/// Header fields come first on every line; event fields follow.
#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// Cheap to clone; clones share one file handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<Sink>,
}

#[derive(Debug)]
struct Sink {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl Sink {
    fn append(&self, line: &str) -> anyhow::Result<()> {
        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            *slot = Some(opened);
        }
        let written = match slot.as_mut() {
            Some(file) => writeln!(file, "{line}").and_then(|_| file.flush()),
            None => Ok(()),
        };
        if written.is_err() {
            // Reopen on the next event.
            *slot = None;
        }
        Ok(written?)
    }
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(Sink {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.sink.path
    }

    pub fn session_id(&self) -> &str {
        &self.sink.session_id
    }

    /// Appends one event. `fields` is normally a `json!({...})` object; a
    /// non-object value is stored under `value`.
    pub fn emit(&self, kind: EventKind, fields: Value) -> anyhow::Result<Value> {
        let fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("value".to_string(), other)]),
        };
        let line = EventLine {
            kind,
            session_id: &self.sink.session_id,
            ts: now_utc_iso(),
            fields,
        };
        let text = serde_json::to_string(&line)?;
        self.sink.append(&text)?;
        Ok(serde_json::to_value(&line)?)
    }

    /// Like [`emit`](Self::emit), but a logging failure only reaches stderr.
    pub fn record(&self, kind: EventKind, fields: Value) {
        if let Err(err) = self.emit(kind, fields) {
            eprintln!(
                "dig warning: failed to log {} to {}: {err:#}",
                kind.as_str(),
                self.sink.path.display()
            );
        }
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
