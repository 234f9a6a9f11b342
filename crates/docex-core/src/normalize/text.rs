//! Text helpers for string canonicalization and presence checks.

use std::collections::HashSet;

use super::patterns::WHITESPACE;

/// Trim and collapse internal whitespace runs to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Whitespace-collapsed, lowercased form used for comparisons.
pub fn casefold(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

fn tokens(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Share of `value`'s tokens that occur anywhere in `text` (0.0 - 1.0).
pub fn token_overlap(value: &str, text: &str) -> f64 {
    let wanted: Vec<String> = tokens(value).collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let present: HashSet<String> = tokens(text).collect();
    let hits = wanted.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / wanted.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_and_casefold() {
        assert_eq!(collapse_whitespace("  Acme \n  Corp\t Ltd "), "Acme Corp Ltd");
        assert_eq!(casefold(" ACME  corp"), "acme corp");
    }

    #[test]
    fn test_token_overlap() {
        assert_eq!(token_overlap("Acme Corp", "Invoice from ACME corp."), 1.0);
        assert_eq!(token_overlap("Acme Widgets", "Invoice from Acme"), 0.5);
        assert_eq!(token_overlap("", "anything"), 0.0);
    }
}
