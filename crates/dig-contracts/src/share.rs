use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::codec;
use crate::parts::GenerationResult;
use crate::presets::Preset;

pub const ALT_TEXT_MAX_CHARS: usize = 160;

/// A normalized, directly usable output image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub resource: String,
    pub filename: String,
    pub alt_text: String,
}

pub fn infer_extension(resource: &str) -> &'static str {
    let media_type = codec::split_resource(resource)
        .map(|(media_type, _)| media_type.to_ascii_lowercase())
        .unwrap_or_default();
    if media_type.contains("png") {
        return "png";
    }
    if media_type.contains("jpeg") {
        return "jpeg";
    }
    if media_type.contains("jpg") {
        return "jpg";
    }
    if media_type.contains("webp") {
        return "webp";
    }
    if media_type.contains("gif") {
        return "gif";
    }
    "png"
}

/// `yyyyMMdd-HHmmss`, local time.
pub fn file_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

pub fn generated_filename(preset: Option<&Preset>, resource: &str, stamp: &str) -> String {
    let ext = infer_extension(resource);
    match preset {
        Some(preset) => format!(
            "dig-{}-{}x{}-{stamp}.{ext}",
            preset.id, preset.width, preset.height
        ),
        None => format!("dig-custom-auto-{stamp}.{ext}"),
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    kept + "…"
}

pub fn alt_text(index: usize, saved_prompt: &str, preset: Option<&Preset>) -> String {
    let base = match saved_prompt.trim() {
        "" => "AI-generated image",
        trimmed => trimmed,
    };
    let label = preset
        .map(|preset| format!(" ({})", preset.label))
        .unwrap_or_default();
    format!(
        "Generated image {} - {}{label}",
        index + 1,
        truncate(base, ALT_TEXT_MAX_CHARS)
    )
}

/// Derives filename and alt text for every image of a result.
pub fn build_artifacts(
    result: &GenerationResult,
    saved_prompt: &str,
    preset: Option<&Preset>,
    at: &DateTime<Local>,
) -> Vec<GeneratedImage> {
    let stamp = file_timestamp(at);
    let many = result.images.len() > 1;
    result
        .images
        .iter()
        .enumerate()
        .map(|(idx, resource)| {
            let mut filename = generated_filename(preset, resource, &stamp);
            if many {
                // Same second, same preset: keep names distinct.
                if let Some(dot) = filename.rfind('.') {
                    filename.insert_str(dot, &format!("-{}", idx + 1));
                }
            }
            GeneratedImage {
                resource: resource.clone(),
                filename,
                alt_text: alt_text(idx, saved_prompt, preset),
            }
        })
        .collect()
}

/// Writes a handle's bytes to `dir/filename` and returns the path.
pub fn save_image(resource: &str, dir: &Path, filename: &str) -> anyhow::Result<PathBuf> {
    let (_, bytes) = codec::resource_to_bytes(resource)?;
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(filename);
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
