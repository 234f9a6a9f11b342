//! Extraction schemas: the field set, types and checks for one document type.

mod embedded;
pub mod kinds;
pub mod registry;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ConfigError;
use crate::models::document::DocumentType;

pub use kinds::FieldKind;
pub use registry::SchemaRegistry;

/// The fields to extract for one document type. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub document_type: DocumentType,
    #[serde(default)]
    pub description: String,
    /// Field specs in prompt order.
    pub fields: Vec<FieldSpec>,
    /// Arithmetic consistency checks between number fields.
    #[serde(default)]
    pub checks: Vec<ArithmeticCheck>,
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn kind(&self) -> Box<dyn FieldKind + '_> {
        self.field_type.kind()
    }
}

/// Declared value type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Date,
    Enum { values: Vec<String> },
    /// Repeated entries (line items, medications) whose cells follow `items`.
    List {
        items: Vec<FieldSpec>,
        /// Checks evaluated within each entry, over item field names.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        checks: Vec<ArithmeticCheck>,
    },
}

impl FieldType {
    /// Canonicalization and plausibility behavior for this type.
    pub fn kind(&self) -> Box<dyn FieldKind + '_> {
        match self {
            FieldType::String => Box::new(kinds::StringKind),
            FieldType::Number => Box::new(kinds::NumberKind),
            FieldType::Date => Box::new(kinds::DateKind),
            FieldType::Enum { values } => Box::new(kinds::EnumKind { values }),
            FieldType::List { items, .. } => Box::new(kinds::ListKind { items }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Enum { .. } => "enum",
            FieldType::List { .. } => "list",
        }
    }

    /// Item specs and per-entry checks of a list field.
    pub fn as_list(&self) -> Option<(&[FieldSpec], &[ArithmeticCheck])> {
        match self {
            FieldType::List { items, checks } => Some((items, checks)),
            _ => None,
        }
    }
}

/// Named validation rule attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rule {
    /// Number must be >= 0.
    NonNegative,
    /// Date must not precede the named date field.
    NotBefore(String),
    /// Date year within the configured plausible range.
    ReasonableDate,
    /// Identifier of at most 50 characters.
    Identifier,
    /// ISO 4217 currency code.
    CurrencyCode,
    Email,
    Phone,
}

impl TryFrom<String> for Rule {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if let Some(other) = s.strip_prefix("not_before:") {
            let other = other.trim();
            if other.is_empty() {
                return Err("not_before needs a field name".to_string());
            }
            return Ok(Rule::NotBefore(other.to_string()));
        }
        match s.as_str() {
            "non_negative" => Ok(Rule::NonNegative),
            "reasonable_date" => Ok(Rule::ReasonableDate),
            "identifier" => Ok(Rule::Identifier),
            "currency_code" => Ok(Rule::CurrencyCode),
            "email" => Ok(Rule::Email),
            "phone" => Ok(Rule::Phone),
            _ => Err(format!("unknown rule '{}'", s)),
        }
    }
}

impl From<Rule> for String {
    fn from(rule: Rule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::NonNegative => f.write_str("non_negative"),
            Rule::NotBefore(other) => write!(f, "not_before:{}", other),
            Rule::ReasonableDate => f.write_str("reasonable_date"),
            Rule::Identifier => f.write_str("identifier"),
            Rule::CurrencyCode => f.write_str("currency_code"),
            Rule::Email => f.write_str("email"),
            Rule::Phone => f.write_str("phone"),
        }
    }
}

/// `target ≈ Π multiply + Σ add − Σ subtract`, where an empty `multiply`
/// contributes nothing.
///
/// At the schema level an operand may name a list column as `items[].total`,
/// which stands for the sum of that cell over every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithmeticCheck {
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multiply: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtract: Vec<String>,
}

impl ArithmeticCheck {
    fn operands(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.target)
            .chain(self.multiply.iter())
            .chain(self.add.iter())
            .chain(self.subtract.iter())
    }
}

/// Split a column operand `list[].field` into its list and item field names.
pub fn column_operand(operand: &str) -> Option<(&str, &str)> {
    operand.split_once("[].")
}

impl ExtractionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// A schema restricted to `names`, in this schema's order. Checks are dropped.
    pub fn subset(&self, names: &[&str]) -> ExtractionSchema {
        ExtractionSchema {
            document_type: self.document_type,
            description: self.description.clone(),
            fields: self
                .fields
                .iter()
                .filter(|f| names.contains(&f.name.as_str()))
                .cloned()
                .collect(),
            checks: Vec::new(),
        }
    }

    /// Response schema handed to the model: an object with one nullable
    /// property per field plus an optional `_confidence` object. List fields
    /// are arrays of objects.
    pub fn response_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut confidence = Map::new();

        for field in &self.fields {
            properties.insert(field.name.clone(), property(field));
            confidence.insert(field.name.clone(), json!({ "type": "NUMBER" }));
        }

        properties.insert(
            "_confidence".into(),
            json!({
                "type": "OBJECT",
                "nullable": true,
                "description": "Your confidence (0.0 - 1.0) in each extracted value",
                "properties": confidence,
            }),
        );

        json!({ "type": "OBJECT", "properties": properties })
    }

    /// Structural checks run when a schema is loaded.
    pub fn check(&self, source_name: &str) -> Result<(), ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedSchema {
            source_name: source_name.to_string(),
            reason,
        };

        self.check_fields(&self.fields, "").map_err(&malformed)?;

        for field in &self.fields {
            let Some((items, checks)) = field.field_type.as_list() else {
                continue;
            };
            if items.is_empty() {
                return Err(malformed(format!("list field '{}' has no item fields", field.name)));
            }
            if let Some(nested) = items.iter().find(|i| i.field_type.as_list().is_some()) {
                return Err(malformed(format!(
                    "list field '{}' nests another list '{}'",
                    field.name, nested.name
                )));
            }
            self.check_fields(items, &format!("{}[].", field.name)).map_err(&malformed)?;
            for check in checks {
                for operand in check.operands() {
                    if !is_number(items, operand) {
                        return Err(malformed(format!(
                            "check on '{}[].{}' references '{}', which is not a number item field",
                            field.name, check.target, operand
                        )));
                    }
                }
            }
        }

        for check in &self.checks {
            for operand in check.operands() {
                let numeric = match column_operand(operand) {
                    Some((list, column)) => self
                        .field(list)
                        .and_then(|spec| spec.field_type.as_list())
                        .is_some_and(|(items, _)| is_number(items, column)),
                    None => is_number(&self.fields, operand),
                };
                if !numeric {
                    return Err(malformed(format!(
                        "check on '{}' references '{}', which is not a number field",
                        check.target, operand
                    )));
                }
            }
        }

        Ok(())
    }

    /// Names, enum values and `not_before` references of one field set.
    /// `not_before` always names a top-level date field.
    fn check_fields(&self, fields: &[FieldSpec], prefix: &str) -> Result<(), String> {
        let mut seen = HashSet::new();
        for field in fields {
            if field.name.trim().is_empty() {
                return Err(format!("{}field with empty name", prefix));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field '{}{}'", prefix, field.name));
            }
            if let FieldType::Enum { values } = &field.field_type {
                if values.is_empty() {
                    return Err(format!("enum field '{}{}' has no values", prefix, field.name));
                }
            }
            for rule in &field.rules {
                if let Rule::NotBefore(other) = rule {
                    match self.field(other) {
                        Some(spec) if spec.field_type == FieldType::Date => {}
                        _ => {
                            return Err(format!(
                                "rule '{}' on '{}{}' does not name a date field",
                                rule, prefix, field.name
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_number(fields: &[FieldSpec], name: &str) -> bool {
    fields
        .iter()
        .any(|f| f.name == name && f.field_type == FieldType::Number)
}

fn property(field: &FieldSpec) -> Value {
    let mut property = Map::new();
    let type_name = match field.field_type {
        FieldType::Number => "NUMBER",
        FieldType::List { .. } => "ARRAY",
        _ => "STRING",
    };
    property.insert("type".into(), json!(type_name));
    property.insert("nullable".into(), json!(true));

    let mut description = field.description.clone();
    match &field.field_type {
        FieldType::Date => description.push_str(" (YYYY-MM-DD)"),
        FieldType::Enum { values } => {
            property.insert("enum".into(), json!(values));
        }
        FieldType::List { items, .. } => {
            let cells: Map<String, Value> = items
                .iter()
                .map(|item| (item.name.clone(), self::property(item)))
                .collect();
            property.insert(
                "items".into(),
                json!({ "type": "OBJECT", "properties": cells }),
            );
        }
        _ => {}
    }
    if !description.trim().is_empty() {
        property.insert("description".into(), json!(description.trim()));
    }
    Value::Object(property)
}
