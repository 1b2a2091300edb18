use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::events::ImageInput;
use crate::error::HubError;

/// Maximum identifier length (user, course, room ids).
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Maximum emoji length (bytes). Covers multi-codepoint sequences.
pub const MAX_EMOJI_LENGTH: usize = 32;

/// Messages shown in history on join.
pub const HISTORY_LIMIT: i64 = 200;

/// A required payload field. Whitespace-only counts as missing.
pub fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, HubError> {
    if value.trim().is_empty() {
        Err(HubError::missing(field))
    } else {
        Ok(value)
    }
}

/// Identifiers are 1-64 chars of letters, digits, underscores and hyphens.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A required, well-formed identifier field of an inbound event.
pub fn require_identifier<'a>(field: &str, value: &'a str) -> Result<&'a str, HubError> {
    let value = require(field, value)?;
    if is_valid_identifier(value) {
        Ok(value)
    } else {
        Err(HubError::InvalidPayload(format!("Malformed identifier: {field}")))
    }
}

/// Validate message content. Must be non-empty and under the length limit.
pub fn validate_message(content: &str, max_len: usize) -> Result<(), HubError> {
    if content.trim().is_empty() {
        return Err(HubError::InvalidPayload("Message cannot be empty".into()));
    }
    if content.chars().count() > max_len {
        return Err(HubError::InvalidPayload(format!(
            "Message too long (max {max_len} characters)"
        )));
    }
    Ok(())
}

pub fn validate_emoji(emoji: &str) -> Result<(), HubError> {
    if emoji.trim().is_empty() {
        return Err(HubError::missing("emoji"));
    }
    if emoji.len() > MAX_EMOJI_LENGTH {
        return Err(HubError::InvalidPayload("Emoji too long".into()));
    }
    Ok(())
}

/// Check an inline image upload and turn it into the `data:` URL stored with
/// the message. Accepts raw base64 or an existing `data:` URL.
pub fn image_to_data_url(image: &ImageInput, max_bytes: usize) -> Result<String, HubError> {
    let data = require("image.data", &image.data)?;
    let declared = require("image.type", &image.content_type)?;
    if !declared.starts_with("image/") {
        return Err(HubError::InvalidPayload(format!(
            "Unsupported image type: {declared}"
        )));
    }

    let (content_type, encoded) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, encoded) = rest
                .split_once(',')
                .ok_or_else(|| HubError::InvalidPayload("Malformed image data".into()))?;
            let content_type = header.strip_suffix(";base64").ok_or_else(|| {
                HubError::InvalidPayload("Image data must be base64 encoded".into())
            })?;
            if !content_type.starts_with("image/") {
                return Err(HubError::InvalidPayload(format!(
                    "Unsupported image type: {content_type}"
                )));
            }
            (content_type, encoded)
        }
        None => (declared, data),
    };

    // Bound the work before decoding: base64 expands 3 bytes to 4 chars.
    if encoded.len() / 4 * 3 > max_bytes + 3 {
        return Err(HubError::InvalidPayload(format!(
            "Image too large (max {max_bytes} bytes)"
        )));
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| HubError::InvalidPayload("Image data is not valid base64".into()))?;
    if decoded.is_empty() {
        return Err(HubError::missing("image.data"));
    }
    if decoded.len() > max_bytes {
        return Err(HubError::InvalidPayload(format!(
            "Image too large (max {max_bytes} bytes)"
        )));
    }

    Ok(format!("data:{content_type};base64,{}", STANDARD.encode(&decoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(data: &str, content_type: &str) -> ImageInput {
        ImageInput {
            data: data.into(),
            name: "pic.png".into(),
            content_type: content_type.into(),
        }
    }

    #[test]
    fn test_require() {
        assert_eq!(require("roomId", "r1").unwrap(), "r1");
        let err = require("roomId", "  ").unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: roomId");
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("665f1c2e9b1d"));
        assert!(is_valid_identifier("user_1-a"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("a:b"));
        assert!(!is_valid_identifier(&"a".repeat(65)));
        assert!(require_identifier("tutorId", "t$1").is_err());
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message("hello", 10).is_ok());
        assert!(validate_message("", 10).is_err());
        assert!(validate_message("   ", 10).is_err());
        assert!(validate_message(&"a".repeat(11), 10).is_err());
        // Limit counts characters, not bytes.
        assert!(validate_message(&"é".repeat(10), 10).is_ok());
    }

    #[test]
    fn test_emoji_validation() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_raw_base64_image() {
        let url = image_to_data_url(&image("aGVsbG8=", "image/png"), 1024).unwrap();
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn test_data_url_image_keeps_its_type() {
        let url = image_to_data_url(&image("data:image/jpeg;base64,aGVsbG8=", "image/png"), 1024)
            .unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_rejected_images() {
        assert!(image_to_data_url(&image("aGVsbG8=", "text/plain"), 1024).is_err());
        assert!(image_to_data_url(&image("not base64!", "image/png"), 1024).is_err());
        assert!(image_to_data_url(&image("", "image/png"), 1024).is_err());
        assert!(image_to_data_url(&image("aGVsbG8=", "image/png"), 4).is_err());
        assert!(
            image_to_data_url(&image("data:text/html;base64,aGVsbG8=", "image/png"), 1024).is_err()
        );
    }
}
