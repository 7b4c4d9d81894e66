use sha2::{Digest, Sha256};

const PAYLOAD_PREVIEW_CHARS: usize = 360;

pub fn payload_digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Escapes backslashes, newlines and quotes and caps the result at
/// `max_chars` characters.
pub fn payload_preview(text: &str, max_chars: usize) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('"', "\\\"");
    if escaped.chars().count() <= max_chars {
        return escaped;
    }
    let prefix = escaped.chars().take(max_chars).collect::<String>();
    format!("{prefix}...")
}

/// Logs a payload by length and digest. The text itself is included only
/// when `include_text` is set.
pub(crate) fn log_payload(label: &str, text: &str, include_text: bool) {
    let length = text.chars().count();
    let sha256 = payload_digest(text);
    if include_text {
        tracing::info!(
            length,
            sha256 = %sha256,
            text = %payload_preview(text, PAYLOAD_PREVIEW_CHARS),
            "{label}"
        );
    } else {
        tracing::info!(length, sha256 = %sha256, "{label}");
    }
}
