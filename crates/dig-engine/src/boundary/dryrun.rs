use std::io::Cursor;

use dig_contracts::chat::{ChatRole, ChatTurn, FINAL_PROMPT_MARKER, OPENING_REQUEST};
use dig_contracts::codec;
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::presets::AspectRatio;
use dig_contracts::request::OutboundRequest;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{ChatBoundary, ModelBoundary};

const DRYRUN_LONG_SIDE: u32 = 256;

/// Offline transport: echoes the prompt and paints one solid-color PNG
/// whose color is a function of the prompt.
pub struct DryrunBoundary;

impl ModelBoundary for DryrunBoundary {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &OutboundRequest) -> DigResult<Value> {
        let (width, height) = dryrun_dims(request.aspect_ratio);
        let digest = prompt_digest(&request.prompt, request.images.len());
        let png = solid_png(width, height, (digest[0], digest[1], digest[2]))
            .map_err(|err| DigError::remote("Dry run render failed", Some(Value::String(err))))?;
        let first_line = request.prompt.lines().next().unwrap_or_default();

        Ok(json!({
            "parts": [
                {
                    "type": "text",
                    "text": format!("Dry run {}: {first_line}", hex::encode(&digest[..4])),
                },
                {
                    "type": "image",
                    "mimeType": "image/png",
                    "data": codec::encode(&png),
                },
            ],
            "debug": {
                "transport": "dryrun",
                "width": width,
                "height": height,
                "inputs": request.images.len(),
            },
        }))
    }
}

const DRYRUN_QUESTIONS: [&str; 2] = [
    "Dry run: what art style and mood should it have?",
    "Dry run: what lighting and composition?",
];

/// Offline chat: asks a fixed pair of questions, then joins every answer
/// into a final prompt.
pub struct DryrunChat;

impl ChatBoundary for DryrunChat {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn reply(&self, history: &[ChatTurn], message: &str) -> DigResult<String> {
        let answers: Vec<&str> = history
            .iter()
            .filter(|turn| turn.role == ChatRole::User && turn.content != OPENING_REQUEST)
            .map(|turn| turn.content.trim())
            .chain(std::iter::once(message.trim()))
            .filter(|text| !text.is_empty())
            .collect();
        Ok(match DRYRUN_QUESTIONS.get(answers.len().saturating_sub(1)) {
            Some(question) => question.to_string(),
            None => format!("{FINAL_PROMPT_MARKER} {}", answers.join(", ")),
        })
    }
}

pub(crate) fn dryrun_dims(ratio: AspectRatio) -> (u32, u32) {
    let (w, h) = ratio.units();
    if w >= h {
        (DRYRUN_LONG_SIDE, DRYRUN_LONG_SIDE * h / w)
    } else {
        (DRYRUN_LONG_SIDE * w / h, DRYRUN_LONG_SIDE)
    }
}

fn prompt_digest(prompt: &str, inputs: usize) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update((inputs as u64).to_be_bytes());
    hasher.finalize().to_vec()
}

fn solid_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> Result<Vec<u8>, String> {
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| err.to_string())?;
    Ok(out.into_inner())
}
