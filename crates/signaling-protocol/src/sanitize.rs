//! Normalisation of user-supplied text before it is rebroadcast.

/// Maximum number of characters kept from a chat message.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 1000;

/// Display name used when a client joins without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Trim a chat message and cap it at [`MAX_CHAT_MESSAGE_CHARS`] characters.
///
/// Returns `None` for messages that are empty after trimming; those are
/// dropped without a broadcast.
#[must_use]
pub fn sanitize_chat_message(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_CHAT_MESSAGE_CHARS).collect())
}

/// Resolve the display name announced for a joining peer.
#[must_use]
pub fn display_name_or_default(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_DISPLAY_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_is_trimmed() {
        assert_eq!(sanitize_chat_message("  hi \n"), Some("hi".to_string()));
    }

    #[test]
    fn test_blank_chat_message_is_dropped() {
        assert_eq!(sanitize_chat_message("   "), None);
        assert_eq!(sanitize_chat_message(""), None);
    }

    #[test]
    fn test_chat_message_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_CHAT_MESSAGE_CHARS + 50);
        let sanitized = sanitize_chat_message(&long).unwrap_or_default();
        assert_eq!(sanitized.chars().count(), MAX_CHAT_MESSAGE_CHARS);
    }

    #[test]
    fn test_display_name_defaults() {
        assert_eq!(display_name_or_default(None), "Anonymous");
        assert_eq!(display_name_or_default(Some("  ")), "Anonymous");
        assert_eq!(display_name_or_default(Some(" Ada ")), "Ada");
    }
}
