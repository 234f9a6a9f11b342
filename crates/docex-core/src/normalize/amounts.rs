//! Amount parsing for the formats models and documents actually produce.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::patterns::{AMOUNT_IN_TEXT, CURRENCY_MARKERS};

/// Parse a formatted amount ("$1,234.56", "1 234,56 EUR", "(12.00)", "100,00").
///
/// When both `,` and `.` appear the last one is the decimal separator. A lone
/// `,` is a thousands separator only when every group after it has exactly
/// three digits; otherwise it is the decimal separator. Returns `None` when
/// anything other than digits, separators and a sign is left after removing
/// currency markers.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    let (inner, parenthesized) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let stripped = CURRENCY_MARKERS.replace_all(inner, "");
    let compact: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00a0}' && *c != '\'')
        .collect();

    let (negative, digits) = match compact.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };

    if digits.is_empty()
        || !digits.starts_with(|c: char| c.is_ascii_digit())
        || !digits.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        return None;
    }

    let normalized = normalize_separators(digits)?;
    let value = Decimal::from_str(&normalized).ok()?;

    if negative || parenthesized {
        Some(-value)
    } else {
        Some(value)
    }
}

fn normalize_separators(digits: &str) -> Option<String> {
    let comma = digits.rfind(',');
    let dot = digits.rfind('.');

    match (comma, dot) {
        (Some(c), Some(d)) if c > d => {
            if digits.matches(',').count() > 1 {
                return None;
            }
            Some(digits.replace('.', "").replace(',', "."))
        }
        (Some(_), Some(_)) => {
            if digits.matches('.').count() > 1 {
                return None;
            }
            Some(digits.replace(',', ""))
        }
        (Some(_), None) => {
            if is_thousands_grouped(digits, ',') {
                Some(digits.replace(',', ""))
            } else if digits.matches(',').count() == 1 {
                Some(digits.replace(',', "."))
            } else {
                None
            }
        }
        (None, Some(_)) => {
            if digits.matches('.').count() == 1 {
                Some(digits.to_string())
            } else if is_thousands_grouped(digits, '.') {
                Some(digits.replace('.', ""))
            } else {
                None
            }
        }
        (None, None) => Some(digits.to_string()),
    }
}

/// "1,234" / "12,345,678": leading group of 1-3 digits, then groups of exactly 3.
fn is_thousands_grouped(digits: &str, sep: char) -> bool {
    let mut groups = digits.split(sep);
    let first_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()));
    first_ok && groups.all(|g| g.len() == 3)
}

/// Every standalone amount in free text that parses, with the matched text.
///
/// Digit runs that are part of a longer token, such as the pieces of
/// `2025-01-01`, `INV-001` or `v2`, are not amounts.
pub fn amount_spans(text: &str) -> impl Iterator<Item = (&str, Decimal)> {
    AMOUNT_IN_TEXT
        .find_iter(text)
        .filter(|m| standalone(text, m.start(), m.end()))
        .filter_map(|m| Some((m.as_str(), parse_amount(m.as_str())?)))
}

/// Every standalone amount in free text that parses.
pub fn amounts_in_text(text: &str) -> Vec<Decimal> {
    amount_spans(text).map(|(_, amount)| amount).collect()
}

fn standalone(text: &str, start: usize, end: usize) -> bool {
    const JOINERS: [char; 4] = ['.', ',', '-', '/'];
    let mut before = text[..start].chars().rev();
    let mut after = text[end..].chars();
    let joined = |next: Option<char>, beyond: Option<char>| match next {
        Some(c) if c.is_alphanumeric() => true,
        Some(c) if JOINERS.contains(&c) => beyond.is_some_and(|b| b.is_ascii_digit()),
        _ => false,
    };
    !joined(before.next(), before.next()) && !joined(after.next(), after.next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount_separators() {
        assert_eq!(parse_amount("100.00"), Some(dec("100.00")));
        assert_eq!(parse_amount("100,00"), Some(dec("100.00")));
        assert_eq!(parse_amount("1,234"), Some(dec("1234")));
        assert_eq!(parse_amount("1,234,567.89"), Some(dec("1234567.89")));
        assert_eq!(parse_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1 234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1.234.567"), Some(dec("1234567")));
    }

    #[test]
    fn test_parse_amount_currency_and_sign() {
        assert_eq!(parse_amount("$90"), Some(dec("90")));
        assert_eq!(parse_amount("EUR 12,50"), Some(dec("12.50")));
        assert_eq!(parse_amount("(12.00)"), Some(dec("-12.00")));
        assert_eq!(parse_amount("-5"), Some(dec("-5")));
        assert_eq!(parse_amount("1 234,56 zł"), Some(dec("1234.56")));
    }

    #[test]
    fn test_parse_amount_rejects_text() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("ninety"), None);
        assert_eq!(parse_amount("12 units"), None);
        assert_eq!(parse_amount("1,2,3"), None);
    }

    #[test]
    fn test_amounts_in_text() {
        let found = amounts_in_text("Subtotal 80.00, Tax 8.00, Total $88.00");
        assert!(found.contains(&dec("88.00")));
        assert!(found.contains(&dec("8.00")));
    }

    #[test]
    fn test_amounts_ignore_digits_inside_tokens() {
        assert_eq!(amounts_in_text("Date 2025-01-01"), vec![]);
        assert_eq!(amounts_in_text("Ref INV-001 issued 03/15/2024"), vec![]);
        assert_eq!(amounts_in_text("Total: $1,500.00."), vec![dec("1500.00")]);
        assert_eq!(amounts_in_text("Amount 12345.67"), vec![dec("12345.67")]);
    }
}
