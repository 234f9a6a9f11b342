//! Field rule checks.

use chrono::{Datelike, Utc};

use crate::models::config::ValidationConfig;
use crate::models::record::{FieldValue, ReconciledRecord};
use crate::normalize::patterns::{CURRENCY_CODES, EMAIL, PHONE, PHONE_STRIP};
use crate::schema::Rule;
use crate::schema::kinds::DateKind;

/// Longest accepted identifier, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 50;

/// Check one rule. Returns the violation message, or `None` when the rule
/// holds or does not apply to the value.
pub fn check_rule(
    rule: &Rule,
    field: &str,
    value: &FieldValue,
    record: &ReconciledRecord,
    config: &ValidationConfig,
) -> Option<String> {
    match rule {
        Rule::NonNegative => {
            let amount = value.as_decimal()?;
            amount
                .is_sign_negative()
                .then(|| format!("{} must not be negative, got {}", field, amount))
        }
        Rule::NotBefore(other) => {
            let date = DateKind::parse_canonical(value)?;
            let other_date = DateKind::parse_canonical(record.get(other)?)?;
            (date < other_date).then(|| {
                format!(
                    "{} ({}) is before {} ({})",
                    field, date, other, other_date
                )
            })
        }
        Rule::ReasonableDate => {
            let date = DateKind::parse_canonical(value)?;
            let max_year = Utc::now().year() + config.max_years_ahead;
            (!(config.min_year..=max_year).contains(&date.year())).then(|| {
                format!(
                    "{} year {} is outside {} - {}",
                    field,
                    date.year(),
                    config.min_year,
                    max_year
                )
            })
        }
        Rule::Identifier => {
            let text = value.to_string();
            let len = text.chars().count();
            (len > MAX_IDENTIFIER_LEN).then(|| {
                format!(
                    "{} is {} characters long, identifiers are at most {}",
                    field, len, MAX_IDENTIFIER_LEN
                )
            })
        }
        Rule::CurrencyCode => {
            let text = value.as_text()?;
            (!CURRENCY_CODES.contains(&text))
                .then(|| format!("{} '{}' is not a supported ISO 4217 code", field, text))
        }
        Rule::Email => {
            let text = value.as_text()?;
            (!EMAIL.is_match(text.trim()))
                .then(|| format!("{} '{}' is not a valid email address", field, text))
        }
        Rule::Phone => {
            let text = value.to_string();
            let digits = PHONE_STRIP.replace_all(&text, "");
            (!PHONE.is_match(&digits))
                .then(|| format!("{} '{}' is not a valid phone number", field, text))
        }
    }
}

/// Suggested replacement for a value violating `rule`.
pub fn rule_correction(rule: &Rule, value: &FieldValue) -> Option<FieldValue> {
    match rule {
        Rule::NonNegative => value.as_decimal().map(|d| FieldValue::Number(d.abs())),
        Rule::CurrencyCode => {
            let text = value.as_text()?.trim();
            let code = match text {
                "$" => "USD",
                "€" => "EUR",
                "£" => "GBP",
                "¥" => "JPY",
                "zł" => "PLN",
                "₹" => "INR",
                other => {
                    let upper = other.to_uppercase();
                    return CURRENCY_CODES
                        .iter()
                        .find(|c| **c == upper)
                        .map(|c| FieldValue::text(*c));
                }
            };
            Some(FieldValue::text(code))
        }
        Rule::Email => {
            let compact: String = value.as_text()?.split_whitespace().collect();
            EMAIL.is_match(&compact).then(|| FieldValue::Text(compact))
        }
        _ => None,
    }
}
