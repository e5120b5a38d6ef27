//! Conversion between raw image bytes, the transport's base64 text, and
//! self-contained `data:` resource handles.

use base64::alphabet;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

use crate::errors::{DigError, DigResult};

pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

const RESOURCE_PREFIX: &str = "data:";
const RESOURCE_MARKER: &str = ";base64,";

/// Decoding accepts padded and unpadded payloads alike; only characters
/// outside the alphabet are errors.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode(text: &str) -> DigResult<Vec<u8>> {
    let cleaned = strip_whitespace(text);
    LENIENT
        .decode(cleaned.as_bytes())
        .map_err(|err| DigError::MalformedEncoding(err.to_string()))
}

/// Builds a `data:{media_type};base64,{payload}` handle.
///
/// Whitespace inside the payload is dropped first, since some transports
/// line-wrap long base64 bodies.
pub fn to_resource(media_type: &str, encoded_payload: &str) -> String {
    let media_type = media_type.trim();
    let media_type = if media_type.is_empty() {
        DEFAULT_IMAGE_MEDIA_TYPE
    } else {
        media_type
    };
    format!(
        "{RESOURCE_PREFIX}{media_type}{RESOURCE_MARKER}{}",
        strip_whitespace(encoded_payload)
    )
}

/// Splits a handle into its media type and still-encoded payload.
///
/// `;key=value` parameters between the media type and `;base64,` are
/// allowed and dropped from the returned media type.
pub fn split_resource(resource: &str) -> DigResult<(String, String)> {
    let trimmed = resource.trim();
    let Some(rest) = trimmed
        .get(..RESOURCE_PREFIX.len())
        .filter(|head| head.eq_ignore_ascii_case(RESOURCE_PREFIX))
        .map(|_| &trimmed[RESOURCE_PREFIX.len()..])
    else {
        return Err(DigError::MalformedEncoding(
            "resource handle must start with 'data:'".to_string(),
        ));
    };
    let Some(marker_at) = rest.find(RESOURCE_MARKER) else {
        return Err(DigError::MalformedEncoding(
            "resource handle is missing ';base64,'".to_string(),
        ));
    };
    let header = &rest[..marker_at];
    let mut segments = header.split(';');
    let media_type = segments.next().unwrap_or_default();
    if media_type.is_empty() || !media_type.chars().all(is_media_type_char) {
        return Err(DigError::MalformedEncoding(format!(
            "invalid media type '{header}' in resource handle"
        )));
    }
    if let Some(bad) = segments.find(|param| !is_parameter(param)) {
        return Err(DigError::MalformedEncoding(format!(
            "invalid parameter '{bad}' in resource handle"
        )));
    }
    let payload = &rest[marker_at + RESOURCE_MARKER.len()..];
    Ok((media_type.to_string(), payload.to_string()))
}

pub fn resource_to_bytes(resource: &str) -> DigResult<(String, Vec<u8>)> {
    let (media_type, payload) = split_resource(resource)?;
    let bytes = decode(&payload)?;
    Ok((media_type, bytes))
}

pub fn is_resource(value: &str) -> bool {
    value
        .trim_start()
        .get(..RESOURCE_PREFIX.len())
        .map(|head| head.eq_ignore_ascii_case(RESOURCE_PREFIX))
        .unwrap_or(false)
}

/// Byte length the payload decodes to, computed without decoding.
pub fn decoded_len(encoded: &str) -> u64 {
    let cleaned = strip_whitespace(encoded);
    let padding = cleaned.bytes().rev().take_while(|byte| *byte == b'=').count() as u64;
    let len = cleaned.len() as u64;
    (len / 4 * 3 + (len % 4) * 3 / 4).saturating_sub(padding.min(2))
}

pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn is_media_type_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '/' | '+' | '.' | '-' | '_')
}

fn is_parameter(segment: &str) -> bool {
    match segment.split_once('=') {
        Some((key, value)) => {
            !key.is_empty()
                && key.chars().all(is_media_type_char)
                && !value.chars().any(|ch| ch.is_whitespace() || ch == ',')
        }
        None => false,
    }
}
