//! Common regex patterns for value normalization and text matching.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Amount candidates in free text: "1,234.56", "1 234,56", "$90", "(12.00)", "12345.67"
    pub static ref AMOUNT_IN_TEXT: Regex = Regex::new(
        r"\(?-?(?:[$€£¥]\s?)?(?:\d{1,3}(?:[,. \u{00a0}]\d{3})+|\d+)(?:[.,]\d{1,2})?\)?"
    ).unwrap();

    // Currency codes and symbols stripped before numeric parsing
    pub static ref CURRENCY_MARKERS: Regex = Regex::new(
        r"(?i)\b(?:USD|EUR|GBP|JPY|CAD|AUD|CHF|CNY|PLN|INR|zł|zl)\b|[$€£¥₹]"
    ).unwrap();

    // Numeric dates
    pub static ref DATE_YMD: Regex = Regex::new(
        r"^(\d{4})[./\-](\d{1,2})[./\-](\d{1,2})$"
    ).unwrap();

    pub static ref DATE_NUMERIC: Regex = Regex::new(
        r"^(\d{1,2})([./\-])(\d{1,2})[./\-](\d{4}|\d{2})$"
    ).unwrap();

    // "March 15, 2024" / "Mar 15 2024"
    pub static ref DATE_MONTH_FIRST: Regex = Regex::new(
        r"(?i)^([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$"
    ).unwrap();

    // "15 March 2024" / "15th Mar, 2024"
    pub static ref DATE_DAY_FIRST: Regex = Regex::new(
        r"(?i)^(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})$"
    ).unwrap();

    // Date candidates in free text
    pub static ref DATE_IN_TEXT: Regex = Regex::new(
        r"(?i)\b\d{4}[./\-]\d{1,2}[./\-]\d{1,2}\b|\b\d{1,2}[./\-]\d{1,2}[./\-](?:\d{4}|\d{2})\b|\b[a-z]{3,9}\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b|\b\d{1,2}(?:st|nd|rd|th)?\s+[a-z]{3,9}\.?,?\s+\d{4}\b"
    ).unwrap();

    pub static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();

    pub static ref EMAIL: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$"
    ).unwrap();

    pub static ref PHONE_STRIP: Regex = Regex::new(r"[\s\-().]").unwrap();

    pub static ref PHONE: Regex = Regex::new(r"^\+?\d{7,15}$").unwrap();
}

/// ISO 4217 codes accepted by the `currency_code` rule.
pub const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "CNY", "PLN", "INR", "SEK", "NOK", "DKK",
    "MXN", "BRL",
];
