//! Formatting utilities for Telegram HTML messages.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub fn utf8_prefix(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut idx = 0usize;
    for (i, _) in s.char_indices() {
        if i > max_bytes {
            break;
        }
        idx = i;
    }
    &s[..idx]
}

/// Truncate `s` to at most `max_bytes`, marking the cut with an ellipsis.
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    const ELLIPSIS: &str = "…";
    if s.len() <= max_bytes {
        return s.to_string();
    }
    if max_bytes < ELLIPSIS.len() {
        return utf8_prefix(s, max_bytes).to_string();
    }
    let head = utf8_prefix(s, max_bytes - ELLIPSIS.len()).trim_end();
    format!("{head}{ELLIPSIS}")
}

/// Short single-line preview, used in logs and button labels.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    format!("{}...", flat.chars().take(max_chars).collect::<String>())
}

/// Escape `text`, shortened so the escaped form fits in `max_bytes` without
/// cutting an entity in half.
pub fn escape_within(text: &str, max_bytes: usize) -> String {
    let mut raw_budget = max_bytes;
    loop {
        let escaped = escape_html(&truncate_with_ellipsis(text, raw_budget));
        if escaped.len() <= max_bytes {
            return escaped;
        }
        if raw_budget == 0 {
            return String::new();
        }
        // Escaping grew the text; shrink the raw budget in proportion.
        raw_budget = (raw_budget * max_bytes / escaped.len()).min(raw_budget - 1);
    }
}
