//! Text utilities.

/// Truncate a string to at most `max` bytes on a char boundary.
///
/// Returns the input unchanged when it already fits.
#[must_use]
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate with a trailing ellipsis marker when cut.
#[must_use]
pub fn truncate_with_marker(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_owned()
    } else {
        format!("{}…", truncate_str(s, max))
    }
}
