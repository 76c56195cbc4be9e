//! Client-supplied filename handling.
//!
//! Upload names are only ever echoed back in `Content-Disposition`; they never
//! become paths on disk.

/// Longest name kept, in characters.
const MAX_NAME_CHARS: usize = 128;

/// Characters that are unsafe in a quoted header value or in a filename on
/// common platforms.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', ';'];

/// Reduce a client-supplied filename to a safe display name.
///
/// Directory components are dropped, unsafe characters collapse into a single
/// underscore, and leading/trailing spaces and dots are trimmed. Returns
/// `None` if nothing usable remains.
pub fn sanitize_upload_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let mut out = String::with_capacity(base.len());
    let mut last_was_replacement = false;
    for c in base.chars().take(MAX_NAME_CHARS) {
        if c.is_control() || UNSAFE_CHARS.contains(&c) {
            if !last_was_replacement {
                out.push('_');
                last_was_replacement = true;
            }
        } else {
            out.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() || trimmed == "_" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Lower-cased extension of a filename, if any.
pub fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
}

/// `Content-Disposition` value offering `name` as an attachment.
///
/// Non-ASCII names get an RFC 5987 `filename*` parameter next to an ASCII
/// fallback.
pub fn attachment_disposition(name: &str) -> String {
    if name.is_ascii() {
        return format!("attachment; filename=\"{}\"", name);
    }

    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
