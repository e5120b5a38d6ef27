use crate::errors::{DigError, DigResult};
use crate::presets::PresetRegistry;

/// Builds the outbound prompt: trimmed user text, then the active snippet
/// after a blank line. The caller's text is borrowed and never modified.
///
/// A custom selection with a blank snippet appends nothing; an unknown
/// preset key is an error.
pub fn compose(
    registry: &PresetRegistry,
    user_text: &str,
    active_preset: Option<&str>,
    custom_snippet: &str,
) -> DigResult<String> {
    let user_text = user_text.trim();
    if user_text.is_empty() {
        return Err(DigError::EmptyPrompt);
    }

    let snippet = match active_preset {
        Some(key) => {
            let preset = registry.get(key)?;
            if preset.is_custom() {
                custom_snippet.trim()
            } else {
                preset.prompt_template.trim()
            }
        }
        None => "",
    };

    if snippet.is_empty() {
        return Ok(user_text.to_string());
    }
    Ok(format!("{user_text}\n\n{snippet}"))
}
