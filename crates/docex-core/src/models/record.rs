//! Extraction attempts and the reconciled record built from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::report::ValidationIssue;

/// One entry of a list field, keyed by item field name.
pub type ListItem = BTreeMap<String, FieldValue>;

/// A canonical field value.
///
/// Dates are stored as `Text` in `YYYY-MM-DD` form; enum values as `Text`
/// holding the schema's spelling. In JSON a `Number` is a JSON number written
/// with its exact decimal digits, a `Text` is a JSON string and a `List` is an
/// array of objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    List(Vec<ListItem>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ListItem]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Blank text or a list without entries.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Number(_) => false,
            FieldValue::List(items) => items.is_empty(),
        }
    }

    /// Convert a JSON value. Strings, numbers and booleans are scalars; an
    /// array of objects is a list whose cells are scalars (null cells are
    /// dropped). Anything else has no field value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry {
                    serde_json::Value::Object(cells) => Some(
                        cells
                            .iter()
                            .filter_map(|(k, v)| Some((k.clone(), FieldValue::scalar_from_json(v)?)))
                            .collect(),
                    ),
                    _ => None,
                })
                .collect::<Option<Vec<ListItem>>>()
                .map(FieldValue::List),
            other => FieldValue::scalar_from_json(other),
        }
    }

    fn scalar_from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Number(n) => decimal_from_json_number(n).map(FieldValue::Number),
            serde_json::Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Number(d) => serde_json::Number::from_str(&d.to_string())
                .map(serde_json::Value::Number)
                .unwrap_or_else(|_| serde_json::Value::String(d.to_string())),
            FieldValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| {
                        serde_json::Value::Object(
                            item.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

fn decimal_from_json_number(n: &serde_json::Number) -> Option<Decimal> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .ok()
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(d) => write!(f, "{}", d),
            FieldValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    for (j, (name, value)) in item.iter().enumerate() {
                        if j > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}={}", name, value)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// A field reference: a top-level field such as `total`, or one cell of a
/// list field such as `items[2].total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath<'a> {
    pub field: &'a str,
    pub cell: Option<(usize, &'a str)>,
}

impl<'a> FieldPath<'a> {
    pub fn parse(path: &'a str) -> Self {
        let cell = path.split_once('[').and_then(|(field, rest)| {
            let (index, name) = rest.split_once("].")?;
            Some((field, index.parse().ok()?, name))
        });
        match cell {
            Some((field, index, name)) => Self {
                field,
                cell: Some((index, name)),
            },
            None => Self { field: path, cell: None },
        }
    }

    /// Path of one list cell.
    pub fn cell(field: &str, index: usize, name: &str) -> String {
        format!("{}[{}].{}", field, index, name)
    }
}

impl From<Decimal> for FieldValue {
    fn from(d: Decimal) -> Self {
        FieldValue::Number(d)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        FieldValue::from_json(&value)
            .ok_or_else(|| D::Error::custom("field value must be a string, a number or a list of objects"))
    }
}

/// Self-consistency agreement for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    /// Attempts whose normalized value matched the winner.
    pub votes: usize,
    /// Attempts that proposed any value for the field.
    pub total: usize,
}

impl Agreement {
    pub fn unanimous(total: usize) -> Self {
        Self { votes: total, total }
    }

    /// `votes / total`, 0.0 when nobody proposed a value.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.votes as f64 / self.total as f64
        }
    }
}

/// One model call's output after matching against the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionAttempt {
    /// Zero-based index of the attempt within its batch.
    pub attempt_index: usize,
    /// Canonicalized values keyed by schema field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Model-reported per-field confidence, when the model supplied it.
    pub model_confidence: Option<BTreeMap<String, f64>>,
}

impl ExtractionAttempt {
    pub fn empty(attempt_index: usize) -> Self {
        Self {
            attempt_index,
            fields: BTreeMap::new(),
            model_confidence: None,
        }
    }
}

/// The record produced by self-consistency voting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    /// Winning value per field.
    pub fields: BTreeMap<String, FieldValue>,
    /// Vote tally per field in `fields`.
    pub agreement: BTreeMap<String, Agreement>,
    /// Mean model-reported confidence of the attempts that voted for the winner.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_confidence: BTreeMap<String, f64>,
}

impl ReconciledRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Look up a field or a list cell by path.
    pub fn get_path(&self, path: &str) -> Option<&FieldValue> {
        let path = FieldPath::parse(path);
        let value = self.fields.get(path.field)?;
        match path.cell {
            None => Some(value),
            Some((index, name)) => value.as_list()?.get(index)?.get(name),
        }
    }

    /// Store a value at a field or list-cell path. Cells of missing list
    /// entries are not created.
    fn set_path(&mut self, path: &str, value: FieldValue) -> bool {
        let parsed = FieldPath::parse(path);
        match parsed.cell {
            None => {
                self.fields.insert(path.to_string(), value);
                true
            }
            Some((index, name)) => match self.fields.get_mut(parsed.field) {
                Some(FieldValue::List(items)) if index < items.len() => {
                    items[index].insert(name.to_string(), value);
                    true
                }
                _ => false,
            },
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlay fields from a later (retry) record. Fields the retry produced
    /// replace the current ones together with their agreement and model confidence.
    pub fn merged_with(mut self, retry: ReconciledRecord) -> Self {
        for (field, value) in retry.fields {
            self.model_confidence.remove(&field);
            if let Some(agreement) = retry.agreement.get(&field) {
                self.agreement.insert(field.clone(), *agreement);
            }
            if let Some(conf) = retry.model_confidence.get(&field) {
                self.model_confidence.insert(field.clone(), *conf);
            }
            self.fields.insert(field, value);
        }
        self
    }

    /// Apply every suggested correction carried by `issues`.
    pub fn apply_corrections(mut self, issues: &[ValidationIssue]) -> Self {
        for issue in issues {
            if let Some(correction) = &issue.suggested_correction {
                if self.set_path(&issue.field, correction.clone()) {
                    self.agreement
                        .entry(FieldPath::parse(&issue.field).field.to_string())
                        .or_insert_with(|| Agreement::unanimous(1));
                }
            }
        }
        self
    }

    /// Replace a field, or one cell of a list field, with a manually edited value.
    pub fn with_edit(mut self, path: &str, value: FieldValue) -> Self {
        if self.set_path(path, value) {
            let field = FieldPath::parse(path).field;
            self.agreement.insert(field.to_string(), Agreement::unanimous(1));
            self.model_confidence.remove(field);
        }
        self
    }

    /// Remove a field or one list cell (manual edit clearing a value).
    pub fn without(mut self, path: &str) -> Self {
        let parsed = FieldPath::parse(path);
        match parsed.cell {
            None => {
                self.fields.remove(path);
                self.agreement.remove(path);
                self.model_confidence.remove(path);
            }
            Some((index, name)) => {
                if let Some(FieldValue::List(items)) = self.fields.get_mut(parsed.field) {
                    if let Some(entry) = items.get_mut(index) {
                        entry.remove(name);
                    }
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_field_value_json_shapes() {
        let n = FieldValue::Number(Decimal::from_str("88.00").unwrap());
        assert_eq!(serde_json::to_string(&n).unwrap(), "88.00");

        let t = FieldValue::text("INV-001");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"INV-001\"");

        let back: FieldValue = serde_json::from_str("88.00").unwrap();
        assert_eq!(back, n);

        let digits: FieldValue = serde_json::from_str("\"12345\"").unwrap();
        assert_eq!(digits, FieldValue::text("12345"));
    }

    #[test]
    fn test_large_amounts_keep_every_digit() {
        let n = FieldValue::Number(Decimal::from_str("12345678901234567.89").unwrap());
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "12345678901234567.89");
        assert_eq!(serde_json::from_str::<FieldValue>(&json).unwrap(), n);
    }

    #[test]
    fn test_field_value_rejects_objects() {
        assert!(serde_json::from_str::<FieldValue>("{\"a\": 1}").is_err());
        assert!(serde_json::from_str::<FieldValue>("[1, 2]").is_err());
        assert!(FieldValue::from_json(&serde_json::Value::Null).is_none());
    }

    #[test]
    fn test_list_json_shape() {
        let json = serde_json::json!([
            {"description": "Widget", "quantity": 2, "note": null},
            {"description": "Bolt"}
        ]);
        let value = FieldValue::from_json(&json).unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["quantity"], FieldValue::Number(Decimal::from(2)));
        assert!(!items[0].contains_key("note"));
        assert_eq!(value.to_string(), "description=Widget, quantity=2; description=Bolt");
        assert!(FieldValue::List(vec![]).is_empty());
    }

    #[test]
    fn test_field_paths() {
        assert_eq!(
            FieldPath::parse("items[2].total"),
            FieldPath { field: "items", cell: Some((2, "total")) }
        );
        assert_eq!(FieldPath::parse("total"), FieldPath { field: "total", cell: None });
        assert_eq!(FieldPath::parse("items[].total").cell, None);
        assert_eq!(FieldPath::cell("items", 0, "quantity"), "items[0].quantity");
    }

    #[test]
    fn test_cell_edits_and_corrections() {
        let item = |q: i64| ListItem::from([("quantity".to_string(), FieldValue::Number(Decimal::from(q)))]);
        let record = ReconciledRecord::default()
            .with_edit("items", FieldValue::List(vec![item(1), item(2)]))
            .with_edit("items[1].quantity", FieldValue::Number(Decimal::from(5)));
        assert_eq!(record.get_path("items[1].quantity"), Some(&FieldValue::Number(Decimal::from(5))));

        let issues = vec![
            ValidationIssue::warning("items[0].quantity", crate::models::report::IssueKind::Arithmetic, "x")
                .with_correction(Some(FieldValue::Number(Decimal::from(3)))),
            ValidationIssue::warning("items[9].quantity", crate::models::report::IssueKind::Arithmetic, "x")
                .with_correction(Some(FieldValue::Number(Decimal::from(4)))),
        ];
        let fixed = record.apply_corrections(&issues);
        assert_eq!(fixed.get_path("items[0].quantity"), Some(&FieldValue::Number(Decimal::from(3))));
        assert_eq!(fixed.get_path("items[9].quantity"), None);
        assert_eq!(fixed.get("items").and_then(FieldValue::as_list).map(<[_]>::len), Some(2));

        let cleared = fixed.without("items[1].quantity");
        assert_eq!(cleared.get_path("items[1].quantity"), None);
        assert_eq!(cleared.get_path("items[0].quantity"), Some(&FieldValue::Number(Decimal::from(3))));
    }

    #[test]
    fn test_agreement_ratio() {
        assert_eq!(Agreement { votes: 2, total: 3 }.ratio(), 2.0 / 3.0);
        assert_eq!(Agreement { votes: 0, total: 0 }.ratio(), 0.0);
    }

    #[test]
    fn test_merge_overrides_retry_fields_only() {
        let mut base = ReconciledRecord::default();
        base.fields.insert("a".into(), FieldValue::text("old"));
        base.agreement.insert("a".into(), Agreement { votes: 1, total: 3 });
        base.fields.insert("b".into(), FieldValue::text("keep"));
        base.agreement.insert("b".into(), Agreement::unanimous(3));

        let mut retry = ReconciledRecord::default();
        retry.fields.insert("a".into(), FieldValue::text("new"));
        retry.agreement.insert("a".into(), Agreement::unanimous(3));

        let merged = base.merged_with(retry);
        assert_eq!(merged.get("a"), Some(&FieldValue::text("new")));
        assert_eq!(merged.agreement["a"], Agreement::unanimous(3));
        assert_eq!(merged.get("b"), Some(&FieldValue::text("keep")));
    }
}
