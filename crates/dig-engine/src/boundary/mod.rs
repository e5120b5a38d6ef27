//! The remote model boundary: one request in, one raw reply object out.
//!
//! Transports only move bytes and report failures as
//! [`DigError::RemoteGeneration`]; classifying the reply is the pipeline's
//! job. Nothing here retries.
//!
//! The prompt-refinement chat has its own, text-only boundary.

mod dryrun;
mod gemini;
mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use dig_contracts::chat::ChatTurn;
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::request::OutboundRequest;
use serde_json::Value;

use crate::config::{EngineConfig, TransportKind};

pub use dryrun::{DryrunBoundary, DryrunChat};
pub use gemini::{GeminiBoundary, GeminiChat};
pub use http::HttpGenerateBoundary;

pub trait ModelBoundary: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &OutboundRequest) -> DigResult<Value>;
}

/// One chat turn: `history` is everything the model should see before
/// `message`, already seeded for a fresh conversation.
pub trait ChatBoundary: Send + Sync {
    fn name(&self) -> &str;
    fn reply(&self, history: &[ChatTurn], message: &str) -> DigResult<String>;
}

#[derive(Default)]
pub struct BoundaryRegistry {
    boundaries: BTreeMap<String, Arc<dyn ModelBoundary>>,
}

impl BoundaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ModelBoundary + 'static>(&mut self, boundary: B) {
        self.boundaries
            .insert(boundary.name().to_string(), Arc::new(boundary));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelBoundary>> {
        self.boundaries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.boundaries.keys().cloned().collect()
    }

    pub fn resolve(&self, kind: TransportKind) -> DigResult<Arc<dyn ModelBoundary>> {
        self.get(kind.as_str()).ok_or_else(|| {
            let hint = match kind {
                TransportKind::Http => "set DIG_GENERATE_URL",
                TransportKind::Gemini => "set GENAI_API_KEY",
                TransportKind::Dryrun => "dryrun is always available",
            };
            DigError::remote(
                format!("Transport '{kind}' is not configured"),
                Some(Value::String(hint.to_string())),
            )
        })
    }
}

/// Every transport the config makes usable. Dry run is always present.
pub fn default_registry(config: &EngineConfig) -> BoundaryRegistry {
    let mut registry = BoundaryRegistry::new();
    registry.register(DryrunBoundary);
    if let Some(url) = config.generate_url.as_deref() {
        registry.register(HttpGenerateBoundary::new(url, config.request_timeout));
    }
    if config.api_key.is_some() {
        registry.register(GeminiBoundary::new(config));
    }
    registry
}

/// The chat transport for `kind`. Chat has no HTTP route.
pub fn chat_boundary(
    config: &EngineConfig,
    kind: TransportKind,
) -> DigResult<Arc<dyn ChatBoundary>> {
    match kind {
        TransportKind::Dryrun => Ok(Arc::new(DryrunChat)),
        TransportKind::Gemini if config.api_key.is_some() => {
            Ok(Arc::new(GeminiChat::new(config)))
        }
        TransportKind::Gemini => Err(DigError::remote(
            "Transport 'gemini' is not configured",
            Some(Value::String("set GENAI_API_KEY".to_string())),
        )),
        TransportKind::Http => Err(DigError::remote(
            "Chat talks to Gemini directly; use --transport gemini or dryrun",
            None,
        )),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
