use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use super::local::LocalStore;
use crate::chat::{ChatRole, ChatTurn};
use crate::events::now_utc_iso;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}

impl ChatMessage {
    pub fn turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// One conversation as listed for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSessionSummary {
    pub session_id: String,
    pub messages: usize,
    pub started_at: String,
    pub updated_at: String,
    /// First user message, for display.
    pub opening: String,
}

impl LocalStore {
    pub fn append_chat_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: ChatRole,
        content: &str,
    ) -> anyhow::Result<ChatMessage> {
        if session_id.trim().is_empty() {
            bail!("chat session id is empty");
        }
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now_utc_iso(),
        };
        self.chat_messages()
            .update(|rows| rows.push(message.clone()))
            .context("failed to save chat message")?;
        Ok(message)
    }

    /// A user's messages in one session, oldest first.
    pub fn chat_history(&self, session_id: &str, user_id: &str) -> Vec<ChatMessage> {
        let mut rows: Vec<ChatMessage> = self
            .chat_messages()
            .load()
            .into_iter()
            .filter(|row| row.session_id == session_id && row.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    /// A user's conversations, most recently active first. Rows are stored
    /// in arrival order, so the first row seen opens its session.
    pub fn chat_sessions(&self, user_id: &str) -> Vec<ChatSessionSummary> {
        let mut sessions: Vec<ChatSessionSummary> = Vec::new();
        for row in self
            .chat_messages()
            .load()
            .into_iter()
            .filter(|row| row.user_id == user_id)
        {
            match sessions
                .iter_mut()
                .find(|summary| summary.session_id == row.session_id)
            {
                Some(summary) => {
                    summary.messages += 1;
                    if row.created_at > summary.updated_at {
                        summary.updated_at = row.created_at.clone();
                    }
                    if summary.opening.is_empty() && row.role == ChatRole::User {
                        summary.opening = row.content.clone();
                    }
                }
                None => sessions.push(ChatSessionSummary {
                    session_id: row.session_id.clone(),
                    messages: 1,
                    started_at: row.created_at.clone(),
                    updated_at: row.created_at.clone(),
                    opening: match row.role {
                        ChatRole::User => row.content.clone(),
                        ChatRole::Model => String::new(),
                    },
                }),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }
}
