//! String helpers shared by the formatter and the bot layer.

/// Truncate to at most `max_chars` characters, appending `...` when anything
/// was cut. Counts characters, not bytes, so multi-byte input stays intact.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// First eight characters of a thread id, the short form used in chat
/// messages and logs. Returns the whole id when it is already short.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
