use std::time::Duration;

use dig_contracts::chat::ChatTurn;
use dig_contracts::codec::DEFAULT_IMAGE_MEDIA_TYPE;
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::request::OutboundRequest;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{truncate_text, ChatBoundary, ModelBoundary};
use crate::config::EngineConfig;

const FAILURE: &str = "generateContent failed";

/// Shared `generateContent` plumbing for the image and chat transports.
#[derive(Clone)]
struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiClient {
    fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn generate_content(&self, model: &str, payload: &Value) -> DigResult<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(DigError::remote(
                "Server API key not configured. Set GENAI_API_KEY",
                None,
            ));
        };
        let response = self
            .http
            .post(self.endpoint_for_model(model))
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| failure(err.to_string(), None, None))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| failure(err.to_string(), Some(Value::from(status.as_u16())), None))?;
        if !status.is_success() {
            return Err(failure_from_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|err| {
            failure(
                format!("invalid JSON payload: {err}"),
                Some(Value::from(status.as_u16())),
                None,
            )
        })
    }
}

/// Talks to the Gemini `generateContent` endpoint directly and answers in
/// the same `{parts: [{type, ...}]}` shape the HTTP transport receives.
pub struct GeminiBoundary {
    client: GeminiClient,
    model: String,
}

impl GeminiBoundary {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: GeminiClient::new(config),
            model: config.image_model.clone(),
        }
    }

    /// Attachments first, in order, then the prompt text.
    fn build_payload(request: &OutboundRequest) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .filter(|image| !image.data.is_empty())
            .map(|image| {
                let mime_type = match image.mime_type.trim() {
                    "" => DEFAULT_IMAGE_MEDIA_TYPE,
                    value => value,
                };
                json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": image.data,
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.as_str(),
                },
            },
        })
    }
}

fn failure(message: impl Into<String>, status: Option<Value>, details: Option<Value>) -> DigError {
    DigError::remote(
        FAILURE,
        Some(json!({
            "message": message.into(),
            "status": status.unwrap_or(Value::Null),
            "details": details.unwrap_or(Value::Null),
        })),
    )
}

/// Google error bodies look like `{error: {code, message, status, details}}`.
fn failure_from_body(code: u16, body: &str) -> DigError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = parsed.get("error").cloned().unwrap_or(Value::Null);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), 512));
    let details = error
        .get("details")
        .cloned()
        .or_else(|| error.get("status").cloned());
    failure(message, Some(Value::from(code)), details)
}

/// Rewrites `candidates[0].content.parts` into typed text/image parts.
pub(crate) fn translate_candidates(reply: &Value) -> Vec<Value> {
    let raw_parts = reply
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut parts = Vec::new();
    for part in raw_parts {
        if let Some(text) = part
            .get("text")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        {
            parts.push(json!({ "type": "text", "text": text }));
            continue;
        }
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let Some(data) = inline
            .get("data")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE);
        parts.push(json!({ "type": "image", "mimeType": mime_type, "data": data }));
    }
    parts
}

impl ModelBoundary for GeminiBoundary {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &OutboundRequest) -> DigResult<Value> {
        let reply = self
            .client
            .generate_content(&self.model, &Self::build_payload(request))?;

        let mut out = Map::new();
        out.insert("parts".to_string(), Value::Array(translate_candidates(&reply)));
        out.insert(
            "debug".to_string(),
            json!({
                "candidates": reply.get("candidates").is_some(),
                "model": self.model,
            }),
        );
        Ok(Value::Object(out))
    }
}

/// Text-only chat over `generateContent`, replaying the conversation on
/// every call.
pub struct GeminiChat {
    client: GeminiClient,
    model: String,
}

impl GeminiChat {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: GeminiClient::new(config),
            model: config.chat_model.clone(),
        }
    }

    fn build_payload(history: &[ChatTurn], message: &str) -> Value {
        let contents: Vec<Value> = history
            .iter()
            .chain(std::iter::once(&ChatTurn::user(message)))
            .map(|turn| {
                json!({
                    "role": turn.role.as_str(),
                    "parts": [{ "text": turn.content }],
                })
            })
            .collect();
        json!({ "contents": contents })
    }
}

impl ChatBoundary for GeminiChat {
    fn name(&self) -> &str {
        "gemini"
    }

    fn reply(&self, history: &[ChatTurn], message: &str) -> DigResult<String> {
        let reply = self
            .client
            .generate_content(&self.model, &Self::build_payload(history, message))?;
        let text = reply_text(&reply);
        if text.is_empty() {
            return Err(failure("model returned no text", None, None));
        }
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
fn reply_text(reply: &Value) -> String {
    translate_candidates(reply)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}
