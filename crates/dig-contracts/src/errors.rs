use serde_json::Value;
use thiserror::Error;

/// Failures scoped to a single composition or submission attempt.
///
/// Validation variants are raised before any network call. Nothing here is
/// fatal to the process; callers decide whether to retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DigError {
    #[error("Maximum of {max} images allowed. You have {current}; trying to add {adding}.")]
    TooManyAttachments {
        max: usize,
        current: usize,
        adding: usize,
    },

    #[error("Image '{name}' is {size} bytes; each image must be at most {max} bytes.")]
    AttachmentTooLarge { name: String, size: u64, max: u64 },

    #[error("'{name}' has media type '{media_type}'; only image files are accepted.")]
    InvalidMediaType { name: String, media_type: String },

    #[error("Please enter some text before generating a response.")]
    EmptyPrompt,

    #[error("Unknown preset '{0}'.")]
    UnknownPreset(String),

    #[error("Attachment index {index} out of range ({len} attached).")]
    Index { index: usize, len: usize },

    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("Failed to encode attachment {index} ('{name}'): {reason}")]
    EncodingFailed {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("A generation is already in progress.")]
    AlreadySubmitting,

    #[error("{}", remote_message(.error, .detail.as_ref()))]
    RemoteGeneration {
        error: String,
        detail: Option<Value>,
    },
}

impl DigError {
    pub fn remote(error: impl Into<String>, detail: Option<Value>) -> Self {
        Self::RemoteGeneration {
            error: error.into(),
            detail: detail.filter(|value| !value.is_null()),
        }
    }

    /// True for failures detected locally before anything left the process.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TooManyAttachments { .. }
                | Self::AttachmentTooLarge { .. }
                | Self::InvalidMediaType { .. }
                | Self::EmptyPrompt
        )
    }
}

fn remote_message(error: &str, detail: Option<&Value>) -> String {
    match detail {
        Some(Value::String(text)) if !text.trim().is_empty() => format!("{error} ({text})"),
        Some(value) => format!(
            "{error} ({})",
            serde_json::to_string(value).unwrap_or_default()
        ),
        None => error.to_string(),
    }
}

pub type DigResult<T> = std::result::Result<T, DigError>;
