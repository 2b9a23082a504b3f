//! Small pure text helpers for log and error previews.

/// Truncate a string to fit within `max_total` characters, appending `suffix` if truncated.
///
/// The suffix counts toward the budget. Counts `char`s, so multi-byte text is
/// never split mid-scalar.
#[must_use]
pub fn truncate_to_fit(raw: &str, max_total: usize, suffix: &str) -> String {
    if raw.chars().count() <= max_total {
        return raw.to_string();
    }
    let take = max_total.saturating_sub(suffix.chars().count());
    let head: String = raw.chars().take(take).collect();
    format!("{head}{suffix}")
}

/// Trim, then truncate to `max` characters with a trailing `...`.
///
/// `max` is clamped to at least 3 so the ellipsis fits.
#[must_use]
pub fn truncate_with_ellipsis(raw: &str, max: usize) -> String {
    truncate_to_fit(raw.trim(), max.max(3), "...")
}
