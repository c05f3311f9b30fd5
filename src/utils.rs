use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Inclusive date window threaded through every entry point so no component
/// has to compute "now" on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Window covering the `days` calendar days ending at `end`, inclusive.
    pub fn trailing_days(end: NaiveDate, days: u64) -> Self {
        let span = days.saturating_sub(1);
        let start = end.checked_sub_days(Days::new(span)).unwrap_or(end);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Normalized slug used as a cross-source matching key: lowercase, runs of
/// non-alphanumerics collapsed to single hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for ch in text.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Canonical form of a storefront order reference: leading `#` stripped,
/// whitespace trimmed. Courier systems drop the `#`; the storefront keeps it.
pub fn normalize_reference(reference: &str) -> String {
    reference.trim().trim_start_matches('#').trim().to_string()
}

/// Lenient date parsing for seller-entered or adapter-supplied strings.
/// Accepts ISO dates, ISO datetimes (with or without timezone suffix), and
/// the day-first forms common in courier exports. Malformed input yields the
/// caller-supplied fallback instead of an error.
pub fn parse_date_lenient(raw: &str, fallback: NaiveDate) -> NaiveDate {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback;
    }

    // Datetime strings: keep only the date part.
    let date_part = trimmed
        .split(['T', ' '])
        .next()
        .unwrap_or(trimmed);

    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return date;
        }
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Wireless Earbuds"), "wireless-earbuds");
        assert_eq!(slugify("  Gel Pen (Black) - 12pc  "), "gel-pen-black-12pc");
        assert_eq!(slugify("UPPER_case/slash"), "upper-case-slash");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("#1050"), "1050");
        assert_eq!(normalize_reference(" #1050 "), "1050");
        assert_eq!(normalize_reference("1050"), "1050");
        assert_eq!(normalize_reference("# 1050"), "1050");
    }

    #[test]
    fn test_parse_date_lenient() {
        let fallback = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        assert_eq!(
            parse_date_lenient("2024-06-15", fallback),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert_eq!(
            parse_date_lenient("2024-06-15T08:30:00Z", fallback),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert_eq!(
            parse_date_lenient("15/06/2024", fallback),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert_eq!(
            parse_date_lenient("15-06-2024", fallback),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert_eq!(parse_date_lenient("not a date", fallback), fallback);
        assert_eq!(parse_date_lenient("", fallback), fallback);
    }

    #[test]
    fn test_trailing_window() {
        let end = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let window = TimeWindow::trailing_days(end, 30);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(window.contains(end));
        assert!(window.contains(window.start));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()));
    }

    #[test]
    fn test_window_swaps_inverted_bounds() {
        let a = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let window = TimeWindow::new(a, b);
        assert_eq!(window.start, b);
        assert_eq!(window.end, a);
    }
}
