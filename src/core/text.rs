// Small text helpers shared by the core components.

/// How much of a user's message we are willing to put into a log line.
pub const LOG_PREVIEW_CHARS: usize = 100;

/// Cut `text` down to at most `max_chars` characters without splitting a
/// multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Preview of message content for log lines.
pub fn truncate_for_log(text: &str) -> &str {
    truncate_chars(text, LOG_PREVIEW_CHARS)
}
