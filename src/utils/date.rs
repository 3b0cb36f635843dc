//! Date helpers for upstreams that return loosely formatted dates.

use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;

pub fn current_year() -> i32 {
    OffsetDateTime::now_utc().year()
}

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("static regex"))
}

/// Best-effort year extraction from strings like "2024", "2024 Jan 15",
/// "2024-01-15", or "Winter 2023". Returns None when no plausible year
/// appears; callers must not rely on exact parsing of rare formats.
pub fn year_from_text(text: &str) -> Option<i32> {
    let captures = year_pattern().captures(text)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Extract an ISO `YYYY-MM-DD` prefix when present.
pub fn iso_date_prefix(text: &str) -> Option<String> {
    let text = text.trim();
    if text.len() < 10 {
        return None;
    }
    let candidate = &text[..10];
    let bytes = candidate.as_bytes();
    let shape_ok = bytes[4] == b'-'
        && bytes[7] == b'-'
        && candidate
            .chars()
            .enumerate()
            .all(|(i, c)| matches!(i, 4 | 7) || c.is_ascii_digit());
    shape_ok.then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_from_loose_formats() {
        assert_eq!(year_from_text("2024"), Some(2024));
        assert_eq!(year_from_text("2024 Jan 15"), Some(2024));
        assert_eq!(year_from_text("Winter 2023"), Some(2023));
        assert_eq!(year_from_text("1998-06-01"), Some(1998));
        assert_eq!(year_from_text("n.d."), None);
        assert_eq!(year_from_text("volume 12"), None);
    }

    #[test]
    fn iso_prefix_requires_full_date_shape() {
        assert_eq!(iso_date_prefix("2024-01-15"), Some("2024-01-15".into()));
        assert_eq!(
            iso_date_prefix("2024-01-15T10:00:00Z"),
            Some("2024-01-15".into())
        );
        assert_eq!(iso_date_prefix("2024 Jan 15"), None);
        assert_eq!(iso_date_prefix("2024"), None);
    }
}
