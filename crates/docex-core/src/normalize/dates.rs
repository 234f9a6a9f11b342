//! Date parsing into canonical `YYYY-MM-DD`.

use chrono::NaiveDate;

use super::patterns::{DATE_DAY_FIRST, DATE_IN_TEXT, DATE_MONTH_FIRST, DATE_NUMERIC, DATE_YMD};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Parse a date written in any of the common formats.
///
/// Numeric dates with `/` or `-` are read month-first unless the first part
/// cannot be a month; dotted dates (`15.03.2024`) are always day-first.
/// A trailing time (`2024-03-15T10:00:00`) is ignored.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_end_matches(',');
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = DATE_YMD.captures(s) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }

    if let Some(caps) = DATE_NUMERIC.captures(s) {
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[3].parse().ok()?;
        let year = parse_year(&caps[4])?;
        let (month, day) = if &caps[2] == "." || first > 12 {
            (second, first)
        } else {
            (first, second)
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = DATE_MONTH_FIRST.captures(s) {
        let month = month_from_name(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = DATE_DAY_FIRST.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_from_name(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    // ISO timestamp
    if s.len() > 10 && s.is_char_boundary(10) && matches!(s.as_bytes()[10], b'T' | b' ') {
        return parse_date(&s[..10]);
    }

    None
}

/// Canonical representation used for date field values.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Every date-looking token in free text that parses.
pub fn dates_in_text(text: &str) -> Vec<NaiveDate> {
    DATE_IN_TEXT
        .find_iter(text)
        .filter_map(|m| parse_date(m.as_str()))
        .collect()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn parse_year(s: &str) -> Option<i32> {
    let year: i32 = s.parse().ok()?;
    if s.len() == 2 {
        // Same pivot as strftime's %y
        Some(if year < 70 { 2000 + year } else { 1900 + year })
    } else {
        Some(year)
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(lower.as_str()))
        .map(|i| i as u32 + 1)
}
