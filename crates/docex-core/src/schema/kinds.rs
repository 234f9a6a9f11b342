//! Per-type behavior of field values.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::models::record::{FieldValue, ListItem};
use crate::normalize::patterns::DATE_IN_TEXT;
use crate::normalize::{
    amounts_in_text, casefold, collapse_whitespace, format_date, parse_amount, parse_date,
};

use super::FieldSpec;

/// Capabilities every field type provides.
pub trait FieldKind {
    /// Canonical form of a proposed value, or `None` if it does not fit the type.
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue>;

    /// Key under which equivalent values are counted as the same vote.
    fn vote_key(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::Text(s) => casefold(s),
            FieldValue::Number(d) => d.normalize().to_string(),
            FieldValue::List(_) => casefold(&value.to_string()),
        }
    }

    /// The value already has the type's canonical shape.
    fn conforms(&self, value: &FieldValue) -> bool;

    /// Best-effort repair for a value that does not conform.
    fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        self.canonicalize(value).filter(|v| self.conforms(v))
    }

    /// How plausible the value looks for this type (0.0 - 1.0).
    fn plausibility(&self, value: &FieldValue) -> f64;
}

pub struct StringKind;

impl FieldKind for StringKind {
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue> {
        let text = match raw {
            FieldValue::Text(s) => collapse_whitespace(s),
            FieldValue::Number(d) => d.to_string(),
            FieldValue::List(_) => return None,
        };
        (!text.is_empty()).then_some(FieldValue::Text(text))
    }

    fn conforms(&self, value: &FieldValue) -> bool {
        matches!(value, FieldValue::Text(s) if !s.trim().is_empty())
    }

    fn plausibility(&self, value: &FieldValue) -> f64 {
        let Some(text) = value.as_text() else {
            return 0.5;
        };
        let len = text.chars().count();
        if len == 0 {
            return 0.0;
        }
        let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
        if alnum * 2 < len {
            0.3
        } else if len > 200 {
            0.6
        } else {
            1.0
        }
    }
}

pub struct NumberKind;

impl FieldKind for NumberKind {
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue> {
        match raw {
            FieldValue::Number(d) => Some(FieldValue::Number(*d)),
            FieldValue::Text(s) => parse_amount(s).map(FieldValue::Number),
            FieldValue::List(_) => None,
        }
    }

    fn conforms(&self, value: &FieldValue) -> bool {
        matches!(value, FieldValue::Number(_))
    }

    fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        if let Some(v) = self.canonicalize(value) {
            return Some(v);
        }
        // "Total: 88.00 due" -> 88.00 when there is exactly one amount
        let found = amounts_in_text(value.as_text()?);
        match found.as_slice() {
            [only] => Some(FieldValue::Number(*only)),
            _ => None,
        }
    }

    fn plausibility(&self, value: &FieldValue) -> f64 {
        match value {
            FieldValue::Number(d) if d.is_sign_negative() => 0.5,
            FieldValue::Number(d) if d.normalize().scale() > 2 => 0.7,
            FieldValue::Number(d) if d.abs() > Decimal::new(1_000_000_000, 0) => 0.6,
            FieldValue::Number(_) => 1.0,
            _ => 0.0,
        }
    }
}

pub struct DateKind;

impl DateKind {
    /// Strictly canonical `YYYY-MM-DD`.
    pub fn parse_canonical(value: &FieldValue) -> Option<NaiveDate> {
        let text = value.as_text()?;
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .filter(|_| text.len() == 10)
    }
}

impl FieldKind for DateKind {
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue> {
        let text = raw.as_text()?;
        parse_date(text).map(|d| FieldValue::Text(format_date(d)))
    }

    fn conforms(&self, value: &FieldValue) -> bool {
        Self::parse_canonical(value).is_some()
    }

    fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        if let Some(v) = self.canonicalize(value) {
            return Some(v);
        }
        let text = match value {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(d) => d.to_string(),
            FieldValue::List(_) => return None,
        };
        DATE_IN_TEXT
            .find_iter(&text)
            .find_map(|m| parse_date(m.as_str()))
            .map(|d| FieldValue::Text(format_date(d)))
    }

    fn plausibility(&self, value: &FieldValue) -> f64 {
        match Self::parse_canonical(value) {
            Some(date) => {
                let max_year = Utc::now().year() + 10;
                if (1900..=max_year).contains(&date.year()) {
                    1.0
                } else {
                    0.3
                }
            }
            None => 0.0,
        }
    }
}

pub struct EnumKind<'a> {
    pub values: &'a [String],
}

fn enum_key(s: &str) -> String {
    casefold(s).replace([' ', '-'], "_")
}

impl FieldKind for EnumKind<'_> {
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue> {
        let key = enum_key(&raw.to_string());
        self.values
            .iter()
            .find(|v| enum_key(v) == key)
            .map(|v| FieldValue::Text(v.clone()))
    }

    fn conforms(&self, value: &FieldValue) -> bool {
        value
            .as_text()
            .is_some_and(|s| self.values.iter().any(|v| v == s))
    }

    fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        if let Some(v) = self.canonicalize(value) {
            return Some(v);
        }
        // "US Dollars (USD)" -> "USD" when exactly one allowed value is mentioned
        let key = enum_key(&value.to_string());
        let tokens: Vec<&str> = key
            .split('_')
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .collect();
        let mut hits = self
            .values
            .iter()
            .filter(|v| tokens.contains(&enum_key(v).as_str()));
        let first = hits.next()?;
        hits.next().is_none().then(|| FieldValue::Text(first.clone()))
    }

    fn plausibility(&self, value: &FieldValue) -> f64 {
        if self.conforms(value) { 1.0 } else { 0.0 }
    }
}

/// Entries of a list field. Each entry's cells follow the item specs.
pub struct ListKind<'a> {
    pub items: &'a [FieldSpec],
}

impl ListKind<'_> {
    /// Canonical form of one entry. Cells without a matching item spec and
    /// blank cells are dropped; cells that do not fit their type are kept as
    /// trimmed text so validation can report them.
    pub fn canonicalize_item(&self, item: &ListItem) -> ListItem {
        self.items
            .iter()
            .filter_map(|spec| {
                let raw = item.get(&spec.name).filter(|v| !v.is_empty())?;
                let value = spec.kind().canonicalize(raw).unwrap_or_else(|| match raw {
                    FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
                    other => other.clone(),
                });
                Some((spec.name.clone(), value))
            })
            .collect()
    }
}

impl FieldKind for ListKind<'_> {
    fn canonicalize(&self, raw: &FieldValue) -> Option<FieldValue> {
        let items = raw.as_list()?;
        Some(FieldValue::List(
            items
                .iter()
                .map(|item| self.canonicalize_item(item))
                .filter(|item| !item.is_empty())
                .collect(),
        ))
    }

    // Cells are checked one by one, so any list has the right shape.
    fn conforms(&self, value: &FieldValue) -> bool {
        matches!(value, FieldValue::List(_))
    }

    /// Mean plausibility of the entries' cells.
    fn plausibility(&self, value: &FieldValue) -> f64 {
        let Some(items) = value.as_list() else {
            return 0.0;
        };
        let scores: Vec<f64> = items
            .iter()
            .flat_map(|item| {
                self.items
                    .iter()
                    .filter_map(|spec| Some(spec.kind().plausibility(item.get(&spec.name)?)))
            })
            .collect();
        if scores.is_empty() {
            1.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}
