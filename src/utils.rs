//! String helpers shared by the decoder, transport and error types
//!
//! Lines coming back from the CLI can contain arbitrary UTF-8, so every
//! truncation here lands on a character boundary.

/// Truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes.
///
/// # Example
/// ```
/// use claude_agent_control::utils::safe_truncate;
///
/// let text = "Status: 🔍 Active";
/// assert_eq!(safe_truncate(text, 10), "Status: ");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for diagnostics, appending "..." if anything was cut.
///
/// # Example
/// ```
/// use claude_agent_control::utils::truncate_for_display;
///
/// assert_eq!(truncate_for_display("{\"type\":\"assistant\"", 8), "{\"type\":...");
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// First whitespace-delimited token of `s`, if any.
#[must_use]
pub fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace().next()
}
