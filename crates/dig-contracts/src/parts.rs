//! Classification of the model's reply into ordered text and image artifacts.
//!
//! Replies come in more than one shape depending on which API version
//! produced them. Extraction walks an ordered list of shape matchers and
//! takes the first that applies; a reply that matches none is empty, not
//! an error.

use serde::Serialize;
use serde_json::Value;

use crate::codec::{self, DEFAULT_IMAGE_MEDIA_TYPE};
use crate::errors::{DigError, DigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyShape {
    /// `{parts: [...]}`
    DirectParts,
    /// `{candidates: [{content: {parts: [...]}}]}`
    CandidateParts,
    /// `{candidates: [{content: {type | mimeType, ...}}]}`
    CandidateContent,
    Empty,
}

type ShapeMatcher = fn(&Value) -> Option<Vec<Value>>;

const SHAPE_MATCHERS: &[(ReplyShape, ShapeMatcher)] = &[
    (ReplyShape::DirectParts, match_direct_parts),
    (ReplyShape::CandidateParts, match_candidate_parts),
    (ReplyShape::CandidateContent, match_candidate_content),
];

fn match_direct_parts(reply: &Value) -> Option<Vec<Value>> {
    reply.get("parts").and_then(Value::as_array).cloned()
}

fn first_candidate_content(reply: &Value) -> Option<&Value> {
    reply
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("content"))
}

fn match_candidate_parts(reply: &Value) -> Option<Vec<Value>> {
    first_candidate_content(reply)?
        .get("parts")
        .and_then(Value::as_array)
        .cloned()
}

fn match_candidate_content(reply: &Value) -> Option<Vec<Value>> {
    let content = first_candidate_content(reply)?.as_object()?;
    if content.contains_key("type") || content.contains_key("mimeType") {
        return Some(vec![Value::Object(content.clone())]);
    }
    None
}

pub fn extract_parts(reply: &Value) -> (ReplyShape, Vec<Value>) {
    for (shape, matcher) in SHAPE_MATCHERS {
        if let Some(parts) = matcher(reply) {
            return (*shape, parts);
        }
    }
    (ReplyShape::Empty, Vec::new())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    Image {
        mime_type: Option<String>,
        data: String,
    },
    Unknown,
}

impl ResponsePart {
    pub fn classify(raw: &Value) -> Self {
        let kind = raw.get("type").and_then(Value::as_str);
        match kind {
            Some("text") => raw
                .get("text")
                .and_then(Value::as_str)
                .map(|text| Self::Text(text.to_string()))
                .unwrap_or(Self::Unknown),
            Some("image") => raw
                .get("data")
                .and_then(Value::as_str)
                .map(|data| Self::Image {
                    mime_type: raw
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                        .map(str::to_string),
                    data: data.to_string(),
                })
                .unwrap_or(Self::Unknown),
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct GenerationResult {
    /// All text parts, in reply order, joined by a blank line.
    pub texts: String,
    /// One `data:` handle per image part, in reply order.
    pub images: Vec<String>,
    #[serde(skip)]
    pub shape: Option<ReplyShape>,
}

impl GenerationResult {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty()
    }
}

/// Turns one image part's payload into a renderable handle.
///
/// Payloads that already carry a `data:` prefix are kept as-is; bare
/// payloads get the part's media type (or the generic default).
pub fn image_resource(mime_type: Option<&str>, data: &str) -> DigResult<String> {
    let cleaned = codec::strip_whitespace(data);
    if codec::is_resource(&cleaned) {
        codec::resource_to_bytes(&cleaned)?;
        return Ok(cleaned);
    }
    let payload = cleaned.strip_prefix("base64,").unwrap_or(&cleaned);
    codec::decode(payload)?;
    Ok(codec::to_resource(
        mime_type.unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE),
        payload,
    ))
}

/// Classifies and normalizes a whole reply.
///
/// Unknown part kinds, empty text and empty image payloads are skipped. A
/// malformed image payload fails the whole reply so no half-decoded image
/// is ever published.
pub fn normalize_reply(reply: &Value) -> DigResult<GenerationResult> {
    let (shape, raw_parts) = extract_parts(reply);
    let mut texts: Vec<String> = Vec::new();
    let mut images: Vec<String> = Vec::new();

    for (idx, raw) in raw_parts.iter().enumerate() {
        match ResponsePart::classify(raw) {
            ResponsePart::Text(text) => {
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            ResponsePart::Image { mime_type, data } => {
                if data.trim().is_empty() {
                    continue;
                }
                let resource = image_resource(mime_type.as_deref(), &data).map_err(|err| {
                    DigError::MalformedEncoding(format!("image part {idx}: {err}"))
                })?;
                images.push(resource);
            }
            ResponsePart::Unknown => {}
        }
    }

    Ok(GenerationResult {
        texts: texts.join("\n\n"),
        images,
        shape: Some(shape),
    })
}
