//! MarkdownV2 escaping for outbound message text
//!
//! Telegram's MarkdownV2 dialect reserves a fixed set of punctuation
//! characters; each must be prefixed with a backslash or the API
//! rejects the message. An empty body becomes an escaped placeholder
//! because the API also rejects empty message text.

/// Characters reserved by the MarkdownV2 dialect
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Placeholder used in place of an empty body
const EMPTY_PLACEHOLDER: &str = "(aucun texte)";

/// Escape text for MarkdownV2; empty input yields the escaped placeholder
pub fn escape(text: &str) -> String {
    if text.is_empty() {
        return escape(EMPTY_PLACEHOLDER);
    }

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
