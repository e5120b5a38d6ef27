//! Generation engine: transports, the submission pipeline, the recorder
//! hand-off, the studio reducer and the prompt-refinement chat.

pub mod boundary;
pub mod chat;
pub mod config;
pub mod pipeline;
pub mod recorder;
pub mod studio;

use std::sync::Arc;

use dig_contracts::errors::DigResult;
use dig_contracts::events::{EventKind, EventWriter};
use dig_contracts::presets::PresetRegistry;
use serde_json::json;

pub use boundary::{chat_boundary, default_registry, BoundaryRegistry, ChatBoundary, ModelBoundary};
pub use chat::{ChatReply, ChatSession};
pub use config::{EngineConfig, TransportKind};
pub use pipeline::{Pipeline, PipelineStatus, Submission, SubmitOutcome, Ticket};
pub use recorder::{hand_off, GenerationRecorder, RecordSummary, StoreRecorder};
pub use studio::{Studio, StudioAction};

/// Wires a fully configured studio: transport, event log, store-backed
/// recorder and recent prompts all come from `config`.
pub fn build_studio(config: &EngineConfig, transport: TransportKind) -> DigResult<Studio> {
    let registry = default_registry(config);
    let boundary = registry.resolve(transport)?;
    let events = EventWriter::new(config.events_path(), uuid::Uuid::new_v4().to_string());
    events.record(
        EventKind::SessionStarted,
        json!({
            "transport": transport.as_str(),
            "user_id": config.user_id,
            "home": config.home.display().to_string(),
        }),
    );

    let pipeline = Pipeline::new(boundary).with_events(events.clone());
    Ok(Studio::new(PresetRegistry::default(), Arc::new(pipeline))
        .with_recorder(
            config.user_id.clone(),
            Arc::new(StoreRecorder::new(config.store())),
        )
        .with_recents(config.recents())
        .with_events(events))
}

/// A chat session that saves its messages and logs to the shared event
/// file under its own session id.
pub fn build_chat(config: &EngineConfig, transport: TransportKind) -> DigResult<ChatSession> {
    let boundary = chat_boundary(config, transport)?;
    let chat = ChatSession::new(boundary, config.user_id.clone()).with_store(config.store());
    let events = EventWriter::new(config.events_path(), chat.session_id().to_string());
    events.record(
        EventKind::SessionStarted,
        json!({
            "transport": transport.as_str(),
            "user_id": config.user_id,
            "mode": "chat",
        }),
    );
    Ok(chat.with_events(events))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn build_studio_logs_session_and_runs_dryrun() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EngineConfig {
            home: temp.path().to_path_buf(),
            user_id: "alice".to_string(),
            ..EngineConfig::default()
        };
        let mut studio = build_studio(&config, config.resolve_transport(None))?;
        assert_eq!(studio.transport(), "dryrun");

        studio.dispatch(StudioAction::EditText("a red fox".to_string()))?;
        studio.dispatch(StudioAction::Submit)?;
        assert_eq!(studio.result().map(|result| result.images.len()), Some(1));
        assert_eq!(config.store().list_history("alice", 50).len(), 1);
        assert_eq!(config.recents().read(), vec!["a red fox"]);

        let raw = std::fs::read_to_string(config.events_path())?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "generation_started",
                "generation_succeeded",
                "generation_recorded",
            ]
        );
        Ok(())
    }

    #[test]
    fn unconfigured_transport_is_refused() {
        let config = EngineConfig::default();
        assert!(build_studio(&config, TransportKind::Gemini).is_err());
    }

    #[test]
    fn build_chat_saves_dryrun_conversation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EngineConfig {
            home: temp.path().to_path_buf(),
            user_id: "alice".to_string(),
            ..EngineConfig::default()
        };
        let transport = config.resolve_chat_transport(None)?;
        let mut chat = build_chat(&config, transport)?;
        assert_eq!(chat.transport(), "dryrun");

        let mut last = chat.send("a red fox")?;
        for answer in ["watercolor", "golden hour"] {
            last = chat.send(answer)?;
        }
        assert_eq!(
            last,
            ChatReply::FinalPrompt("a red fox, watercolor, golden hour".to_string())
        );
        let sessions = config.store().chat_sessions("alice");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages, 6);
        assert!(build_chat(&config, TransportKind::Http).is_err());
        Ok(())
    }
}
