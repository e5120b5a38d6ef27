use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{DigError, DigResult};

pub const CUSTOM_PRESET: &str = "other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Portrait,
    #[default]
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Square, Self::Portrait, Self::Wide];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "4:5",
            Self::Wide => "16:9",
        }
    }

    /// Width over height, in whole ratio units.
    pub fn units(&self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Portrait => (4, 5),
            Self::Wide => (16, 9),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "1:1" | "square" => Ok(Self::Square),
            "4:5" | "portrait" => Ok(Self::Portrait),
            "16:9" | "wide" | "landscape" => Ok(Self::Wide),
            _ => Err(format!(
                "unsupported aspect ratio '{raw}' (expected one of 1:1, 4:5, 16:9)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub id: String,
    pub label: String,
    pub desc: Option<String>,
    pub ratio: AspectRatio,
    pub width: u32,
    pub height: u32,
    /// Appended to the user's prompt at submit time. Empty for the custom variant.
    pub prompt_template: String,
}

impl Preset {
    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_PRESET
    }
}

#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: IndexMap<String, Preset>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PresetRegistry {
    pub fn new(presets: Option<IndexMap<String, Preset>>) -> Self {
        Self {
            presets: presets.unwrap_or_else(default_presets),
        }
    }

    pub fn get(&self, key: &str) -> DigResult<&Preset> {
        self.presets
            .get(key.trim())
            .ok_or_else(|| DigError::UnknownPreset(key.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn keys(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }
}

pub fn format_resolution(preset: &Preset) -> String {
    format!("{}×{}", preset.width, preset.height)
}

fn default_presets() -> IndexMap<String, Preset> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str,
                      label: &str,
                      desc: &str,
                      ratio: AspectRatio,
                      (width, height): (u32, u32),
                      prompt_template: &str| {
        map.insert(
            id.to_string(),
            Preset {
                id: id.to_string(),
                label: label.to_string(),
                desc: Some(desc.to_string()).filter(|value| !value.is_empty()),
                ratio,
                width,
                height,
                prompt_template: prompt_template.to_string(),
            },
        );
    };

    insert(
        "instagram",
        "Instagram-ready image",
        "1080×1350, vibrant, crisp",
        AspectRatio::Portrait,
        (1080, 1350),
        "Create an Instagram-ready vertical image (1080x1350). High contrast, vibrant colors, crisp details, minimal background, subtle grain. Export as PNG.",
    );
    insert(
        "ghibli",
        "Ghibli image",
        "Soft pastels, painterly, whimsical",
        AspectRatio::Wide,
        (1280, 720),
        "Render in a Studio Ghibli-inspired style: soft pastels, painterly textures, warm sunlight, whimsical mood, gentle outlines, detailed nature background.",
    );
    insert(
        "professional",
        "Professional image",
        "Studio-quality, neutral bg",
        AspectRatio::Square,
        (1200, 1200),
        "Create a professional studio-quality product photo. Neutral background, soft diffused lighting, high dynamic range, sharp focus, realistic color, 4k detail.",
    );
    // Custom snippets come from the caller at compose time and never land here.
    insert(
        CUSTOM_PRESET,
        "Other (custom)",
        "Append your own snippet",
        AspectRatio::Square,
        (1024, 1024),
        "",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_presets_in_declaration_order() {
        let registry = PresetRegistry::default();
        assert_eq!(
            registry.keys(),
            vec!["instagram", "ghibli", "professional", "other"]
        );
    }

    #[test]
    fn get_rejects_unknown_keys() {
        let registry = PresetRegistry::default();
        assert_eq!(
            registry.get("tiktok").err(),
            Some(DigError::UnknownPreset("tiktok".to_string()))
        );
    }

    #[test]
    fn custom_preset_has_empty_template() -> anyhow::Result<()> {
        let registry = PresetRegistry::default();
        let custom = registry.get(CUSTOM_PRESET)?;
        assert!(custom.is_custom());
        assert!(custom.prompt_template.is_empty());
        Ok(())
    }

    #[test]
    fn format_resolution_uses_multiplication_sign() -> anyhow::Result<()> {
        let registry = PresetRegistry::default();
        assert_eq!(format_resolution(registry.get("instagram")?), "1080×1350");
        assert_eq!(registry.get("instagram")?.ratio, AspectRatio::Portrait);
        Ok(())
    }

    #[test]
    fn aspect_ratio_parses_and_serializes_as_wire_text() -> anyhow::Result<()> {
        assert_eq!("4:5".parse::<AspectRatio>(), Ok(AspectRatio::Portrait));
        assert_eq!(" Square ".parse::<AspectRatio>(), Ok(AspectRatio::Square));
        assert!("3:2".parse::<AspectRatio>().is_err());
        assert_eq!(serde_json::to_string(&AspectRatio::Wide)?, "\"16:9\"");
        assert_eq!(AspectRatio::default(), AspectRatio::Wide);
        Ok(())
    }
}
