use serde::{Deserialize, Serialize};

use crate::attachments::{MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES};
use crate::codec;
use crate::errors::{DigError, DigResult};
use crate::presets::AspectRatio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

/// The single unit sent across the model boundary.
///
/// Serializes to `{prompt, images: [{mimeType, data}], aspectRatio}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub prompt: String,
    #[serde(default)]
    pub images: Vec<EncodedImage>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

impl OutboundRequest {
    /// Re-checks the wire constraints right before sending.
    pub fn validate(&self) -> DigResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(DigError::EmptyPrompt);
        }
        if self.images.len() > MAX_ATTACHMENTS {
            return Err(DigError::TooManyAttachments {
                max: MAX_ATTACHMENTS,
                current: 0,
                adding: self.images.len(),
            });
        }
        for (idx, image) in self.images.iter().enumerate() {
            let size = codec::decoded_len(&image.data);
            if size > MAX_ATTACHMENT_BYTES {
                return Err(DigError::AttachmentTooLarge {
                    name: format!("image {idx}"),
                    size,
                    max: MAX_ATTACHMENT_BYTES,
                });
            }
        }
        Ok(())
    }
}
