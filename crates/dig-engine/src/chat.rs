//! Prompt-refinement chat: a conversation with the model that ends when it
//! answers with a finished prompt.

use std::sync::Arc;

use dig_contracts::chat::{final_prompt, replay_history, ChatRole, ChatTurn};
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::events::{EventKind, EventWriter};
use dig_contracts::store::{ChatMessage, LocalStore};
use serde_json::json;

use crate::boundary::ChatBoundary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    /// The model is still asking questions.
    Message(String),
    /// The model produced a prompt ready to generate from.
    FinalPrompt(String),
}

impl ChatReply {
    pub fn text(&self) -> &str {
        match self {
            Self::Message(text) | Self::FinalPrompt(text) => text,
        }
    }
}

pub struct ChatSession {
    boundary: Arc<dyn ChatBoundary>,
    user_id: String,
    session_id: String,
    transcript: Vec<ChatTurn>,
    final_prompt: Option<String>,
    store: Option<LocalStore>,
    events: Option<EventWriter>,
}

impl ChatSession {
    pub fn new(boundary: Arc<dyn ChatBoundary>, user_id: impl Into<String>) -> Self {
        Self {
            boundary,
            user_id: user_id.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            transcript: Vec::new(),
            final_prompt: None,
            store: None,
            events: None,
        }
    }

    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Continues a saved conversation. Needs a store.
    pub fn resume(&mut self, session_id: &str) -> DigResult<()> {
        let Some(store) = self.store.as_ref() else {
            return Err(DigError::remote("Chat history is not available", None));
        };
        let history = store.chat_history(session_id, &self.user_id);
        if history.is_empty() {
            return Err(DigError::remote(
                format!("No chat session '{session_id}'"),
                None,
            ));
        }
        self.transcript = history.iter().map(ChatMessage::turn).collect();
        self.final_prompt = self
            .transcript
            .iter()
            .rev()
            .filter(|turn| turn.role == ChatRole::Model)
            .find_map(|turn| final_prompt(&turn.content));
        self.session_id = session_id.to_string();
        Ok(())
    }

    pub fn send(&mut self, message: &str) -> DigResult<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(DigError::EmptyPrompt);
        }
        let history = replay_history(&self.transcript);
        let text = match self.boundary.reply(&history, message) {
            Ok(text) => text,
            Err(err) => {
                self.log(
                    EventKind::ChatFailed,
                    json!({ "error": err.to_string(), "turns": self.transcript.len() }),
                );
                return Err(err);
            }
        };

        self.transcript.push(ChatTurn::user(message));
        self.transcript.push(ChatTurn::model(text.clone()));
        self.persist(ChatRole::User, message);
        self.persist(ChatRole::Model, &text);

        let finished = final_prompt(&text);
        self.log(
            EventKind::ChatReplied,
            json!({
                "transport": self.boundary.name(),
                "turns": self.transcript.len(),
                "final_prompt": finished.is_some(),
            }),
        );
        Ok(match finished {
            Some(prompt) => {
                self.final_prompt = Some(prompt.clone());
                ChatReply::FinalPrompt(prompt)
            }
            None => ChatReply::Message(text),
        })
    }

    /// Drops the transcript and opens a new session id. Saved messages of the
    /// old session stay in the store.
    pub fn start_over(&mut self) {
        self.transcript.clear();
        self.final_prompt = None;
        self.session_id = uuid::Uuid::new_v4().to_string();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    pub fn final_prompt(&self) -> Option<&str> {
        self.final_prompt.as_deref()
    }

    pub fn transport(&self) -> &str {
        self.boundary.name()
    }

    fn persist(&self, role: ChatRole, content: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(err) = store.append_chat_message(&self.session_id, &self.user_id, role, content)
        {
            eprintln!("dig warning: {err:#}");
        }
    }

    fn log(&self, kind: EventKind, payload: serde_json::Value) {
        if let Some(events) = self.events.as_ref() {
            events.record(kind, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use dig_contracts::chat::OPENING_REQUEST;
    use dig_contracts::store::CHAT_MESSAGES_TABLE;
    use serde_json::Value;

    use super::*;

    /// Replays canned replies and remembers the history it was shown.
    #[derive(Default)]
    struct ScriptedChat {
        replies: Mutex<VecDeque<DigResult<String>>>,
        seen: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl ScriptedChat {
        fn with(replies: Vec<DigResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Vec<ChatTurn>> {
            self.seen.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl ChatBoundary for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        fn reply(&self, history: &[ChatTurn], _message: &str) -> DigResult<String> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(history.to_vec());
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or_else(|| Ok("Anything else?".to_string()))
        }
    }

    #[test]
    fn conversation_ends_with_final_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let boundary = ScriptedChat::with(vec![
            Ok("What style?".to_string()),
            Ok("Here it is.\nFINAL_PROMPT: A red fox, watercolor, 8k".to_string()),
        ]);
        let mut chat = ChatSession::new(boundary.clone(), "alice").with_store(store.clone());

        assert_eq!(
            chat.send("a red fox")?,
            ChatReply::Message("What style?".to_string())
        );
        assert_eq!(
            chat.send("watercolor")?,
            ChatReply::FinalPrompt("A red fox, watercolor, 8k".to_string())
        );
        assert_eq!(chat.final_prompt(), Some("A red fox, watercolor, 8k"));

        let seen = boundary.seen();
        assert_eq!(seen[0][0], ChatTurn::user(OPENING_REQUEST));
        assert_eq!(seen[0].len(), 2);
        assert_eq!(
            seen[1],
            vec![ChatTurn::user("a red fox"), ChatTurn::model("What style?")]
        );
        assert_eq!(store.chat_history(chat.session_id(), "alice").len(), 4);
        Ok(())
    }

    #[test]
    fn failed_reply_leaves_transcript_alone() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "s");
        let boundary = ScriptedChat::with(vec![Err(DigError::remote("quota", None))]);
        let mut chat = ChatSession::new(boundary, "alice").with_events(events);

        assert!(matches!(chat.send("   "), Err(DigError::EmptyPrompt)));
        assert!(chat.send("a fox").is_err());
        assert!(chat.transcript().is_empty());
        assert_eq!(chat.send("a fox")?, ChatReply::Message("Anything else?".to_string()));

        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types, vec!["chat_failed", "chat_replied"]);
        Ok(())
    }

    #[test]
    fn resume_replays_saved_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.append_chat_message("s1", "alice", ChatRole::User, "an owl")?;
        store.append_chat_message("s1", "alice", ChatRole::Model, "FINAL_PROMPT: An owl")?;

        let boundary = ScriptedChat::with(Vec::new());
        let mut chat = ChatSession::new(boundary.clone(), "alice").with_store(store.clone());
        assert!(chat.resume("missing").is_err());
        chat.resume("s1")?;
        assert_eq!(chat.session_id(), "s1");
        assert_eq!(chat.final_prompt(), Some("An owl"));

        chat.send("make it snowy")?;
        assert_eq!(boundary.seen()[0].len(), 2);
        assert_eq!(boundary.seen()[0][0], ChatTurn::user("an owl"));

        chat.start_over();
        assert_ne!(chat.session_id(), "s1");
        assert!(chat.transcript().is_empty());
        assert_eq!(chat.final_prompt(), None);
        Ok(())
    }

    #[test]
    fn unsaved_messages_do_not_fail_the_reply() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        // A damaged table refuses writes.
        std::fs::write(temp.path().join(CHAT_MESSAGES_TABLE), "{not json")?;
        let mut chat = ChatSession::new(ScriptedChat::with(Vec::new()), "alice").with_store(store);
        assert!(chat.send("a fox").is_ok());
        assert_eq!(chat.transcript().len(), 2);
        Ok(())
    }
}
