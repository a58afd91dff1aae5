//! Message sanitization.
//!
//! Every message passes through [`clean_message`] before it is handed to the
//! sink: UTF-8 coercion, ANSI escape removal, control-character replacement,
//! trimming, and a byte-length cap that never splits a UTF-8 scalar. The
//! whole pipeline is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Byte cap applied to sanitized messages.
pub const MAX_MESSAGE_BYTES: usize = 64_000;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
});

/// Sanitize a message for persistence.
///
/// Returns an empty string when nothing printable survives; callers drop
/// such entries instead of storing them.
pub fn clean_message(message: &str) -> String {
    if message.is_empty() {
        return String::new();
    }

    let cleaned = ANSI_ESCAPE.replace_all(message, "");

    let mut replaced = String::with_capacity(cleaned.len());
    for ch in cleaned.chars() {
        if ch.is_control() && !ch.is_whitespace() {
            // Control bytes survive ANSI stripping in truncated escape
            // sequences and binary spills; a space keeps the sink happy.
            replaced.push(' ');
        } else {
            replaced.push(ch);
        }
    }

    let trimmed = replaced.trim();
    // Truncation can expose trailing whitespace; trim again so the result is
    // a fixed point of this function.
    truncate_utf8(trimmed, MAX_MESSAGE_BYTES).trim_end().to_string()
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 scalar.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Decode bytes as UTF-8, dropping invalid sequences.
pub fn to_valid_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                if let Ok(s) = std::str::from_utf8(valid) {
                    out.push_str(s);
                }
                match err.error_len() {
                    Some(len) => rest = &after[len..],
                    None => return out,
                }
            }
        }
    }
}

/// Reports whether the bytes contain non-printable, non-whitespace content.
///
/// Invalid UTF-8 counts as non-printable. Used to detect the 8-byte stdcopy
/// frame header on otherwise plain log lines.
pub fn contains_unprintable(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.chars().any(|ch| ch.is_control() && !ch.is_whitespace()),
        Err(_) => true,
    }
}
