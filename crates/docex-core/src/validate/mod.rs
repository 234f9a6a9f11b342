//! Schema and domain validation of reconciled records.

pub mod rules;

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::config::ValidationConfig;
use crate::models::document::DocumentType;
use crate::models::record::{FieldPath, FieldValue, ListItem, ReconciledRecord};
use crate::models::report::{IssueKind, ValidationIssue};
use crate::schema::{ArithmeticCheck, ExtractionSchema, FieldSpec, column_operand};

/// Checks records against their schema.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

/// Arithmetic left the range of `Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overflow;

/// Where check operands are looked up.
#[derive(Clone, Copy)]
enum Scope<'a> {
    Record(&'a ReconciledRecord),
    Entry(&'a ListItem),
}

impl Scope<'_> {
    fn contains(&self, name: &str) -> bool {
        match self {
            Scope::Record(record) => record.contains(column_operand(name).map_or(name, |(list, _)| list)),
            Scope::Entry(entry) => entry.contains_key(name),
        }
    }

    /// Numeric value of an operand, `None` when it is absent or not a number.
    /// A column operand sums the cell over every entry and needs a non-empty
    /// list whose entries all carry a number there.
    fn number(&self, name: &str) -> Result<Option<Decimal>, Overflow> {
        match self {
            Scope::Entry(entry) => Ok(entry.get(name).and_then(FieldValue::as_decimal)),
            Scope::Record(record) => match column_operand(name) {
                None => Ok(record.get(name).and_then(FieldValue::as_decimal)),
                Some((list, column)) => {
                    let Some(entries) = record.get(list).and_then(FieldValue::as_list) else {
                        return Ok(None);
                    };
                    if entries.is_empty() {
                        return Ok(None);
                    }
                    let mut sum = Decimal::ZERO;
                    for entry in entries {
                        let Some(cell) = entry.get(column).and_then(FieldValue::as_decimal) else {
                            return Ok(None);
                        };
                        sum = sum.checked_add(cell).ok_or(Overflow)?;
                    }
                    Ok(Some(sum))
                }
            },
        }
    }
}

impl Validator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Run every check, in order: required presence, type conformance,
    /// arithmetic checks, field rules, then the same checks inside each
    /// entry of every list field.
    pub fn validate(
        &self,
        record: &ReconciledRecord,
        schema: &ExtractionSchema,
        document_type: DocumentType,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for spec in schema.required_fields() {
            match record.get(&spec.name) {
                Some(FieldValue::List(entries)) if entries.is_empty() => {
                    issues.push(ValidationIssue::error(
                        &spec.name,
                        IssueKind::MissingRequired,
                        format!("'{}' needs at least one entry", spec.name),
                    ));
                }
                value if value.is_none_or(FieldValue::is_empty) => {
                    issues.push(ValidationIssue::error(
                        &spec.name,
                        IssueKind::MissingRequired,
                        format!("required field '{}' is missing", spec.name),
                    ));
                }
                _ => {}
            }
        }

        for spec in &schema.fields {
            if let Some(value) = present(record, &spec.name) {
                issues.extend(self.type_issue(spec, &spec.name, value));
            }
        }

        for check in &schema.checks {
            issues.extend(self.check_issue(check, Scope::Record(record), &check.target));
        }

        for spec in &schema.fields {
            if let Some(value) = present(record, &spec.name) {
                issues.extend(self.rule_issues(spec, &spec.name, value, record));
            }
        }

        for spec in &schema.fields {
            let Some((item_specs, checks)) = spec.field_type.as_list() else {
                continue;
            };
            let Some(entries) = record.get(&spec.name).and_then(FieldValue::as_list) else {
                continue;
            };
            for (index, entry) in entries.iter().enumerate() {
                let cell_path = |name: &str| FieldPath::cell(&spec.name, index, name);

                for item in item_specs.iter().filter(|i| i.required) {
                    if entry.get(&item.name).is_none_or(FieldValue::is_empty) {
                        issues.push(ValidationIssue::error(
                            &cell_path(&item.name),
                            IssueKind::MissingRequired,
                            format!(
                                "required field '{}' is missing from {}[{}]",
                                item.name, spec.name, index
                            ),
                        ));
                    }
                }
                for item in item_specs {
                    if let Some(value) = entry.get(&item.name).filter(|v| !v.is_empty()) {
                        issues.extend(self.type_issue(item, &cell_path(&item.name), value));
                    }
                }
                for check in checks {
                    issues.extend(self.check_issue(check, Scope::Entry(entry), &cell_path(&check.target)));
                }
                for item in item_specs {
                    if let Some(value) = entry.get(&item.name).filter(|v| !v.is_empty()) {
                        issues.extend(self.rule_issues(item, &cell_path(&item.name), value, record));
                    }
                }
            }
        }

        debug!(
            "Validated {} record: {} issues ({} errors)",
            document_type,
            issues.len(),
            issues.iter().filter(|i| i.is_error()).count()
        );
        issues
    }

    /// Best-effort fix for an issue, computed from the current record.
    /// `issue.field` may be a list cell path such as `items[0].total`.
    pub fn suggest_correction(
        &self,
        issue: &ValidationIssue,
        record: &ReconciledRecord,
        schema: &ExtractionSchema,
    ) -> Option<FieldValue> {
        let path = FieldPath::parse(&issue.field);
        let field = schema.field(path.field)?;
        let (spec, checks, scope, target) = match path.cell {
            None => (field, schema.checks.as_slice(), Scope::Record(record), path.field),
            Some((index, name)) => {
                let (items, checks) = field.field_type.as_list()?;
                let entry = record.get(path.field)?.as_list()?.get(index)?;
                let spec = items.iter().find(|i| i.name == name)?;
                (spec, checks, Scope::Entry(entry), name)
            }
        };
        let value = record.get_path(&issue.field).filter(|v| !v.is_empty());

        match issue.kind {
            IssueKind::MissingRequired => None,
            IssueKind::TypeMismatch => spec.kind().coerce(value?),
            IssueKind::Arithmetic => checks
                .iter()
                .filter(|c| c.target == target)
                .find_map(|c| evaluate(c, scope).ok().flatten())
                .map(|(_, expected)| FieldValue::Number(expected)),
            IssueKind::RuleViolation => {
                let value = value?;
                spec.rules
                    .iter()
                    .filter(|rule| {
                        rules::check_rule(rule, &issue.field, value, record, &self.config).is_some()
                    })
                    .find_map(|rule| rules::rule_correction(rule, value))
            }
        }
    }

    fn type_issue(&self, spec: &FieldSpec, path: &str, value: &FieldValue) -> Option<ValidationIssue> {
        let kind = spec.kind();
        if kind.conforms(value) {
            return None;
        }
        Some(
            ValidationIssue::error(
                path,
                IssueKind::TypeMismatch,
                format!("'{}' is not a valid {}", value, spec.field_type.name()),
            )
            .with_correction(kind.coerce(value)),
        )
    }

    fn check_issue(&self, check: &ArithmeticCheck, scope: Scope<'_>, path: &str) -> Option<ValidationIssue> {
        match evaluate(check, scope) {
            Ok(Some((actual, expected))) if self.mismatch(actual, expected) => Some(
                ValidationIssue::warning(
                    path,
                    IssueKind::Arithmetic,
                    format!("{} is {} but {} gives {}", path, actual, describe(check), expected),
                )
                .with_correction(Some(FieldValue::Number(expected))),
            ),
            Ok(_) => None,
            Err(Overflow) => {
                debug!("Arithmetic check on {} overflowed", path);
                Some(ValidationIssue::warning(
                    path,
                    IssueKind::Arithmetic,
                    format!("{} cannot be checked: {} is out of range", path, describe(check)),
                ))
            }
        }
    }

    fn rule_issues(
        &self,
        spec: &FieldSpec,
        path: &str,
        value: &FieldValue,
        record: &ReconciledRecord,
    ) -> Vec<ValidationIssue> {
        spec.rules
            .iter()
            .filter_map(|rule| {
                let message = rules::check_rule(rule, path, value, record, &self.config)?;
                Some(
                    ValidationIssue::warning(path, IssueKind::RuleViolation, message)
                        .with_correction(rules::rule_correction(rule, value)),
                )
            })
            .collect()
    }

    /// A difference too large to represent is a mismatch.
    fn mismatch(&self, actual: Decimal, expected: Decimal) -> bool {
        actual
            .checked_sub(expected)
            .is_none_or(|diff| diff.abs() > self.config.tolerance)
    }
}

/// `(target, Π multiply + Σ add − Σ subtract)` when the check can be evaluated.
///
/// Missing subtract operands count as zero; a missing target, factor or add
/// operand, or any non-number operand, skips the check.
fn evaluate(check: &ArithmeticCheck, scope: Scope<'_>) -> Result<Option<(Decimal, Decimal)>, Overflow> {
    let Some(actual) = scope.number(&check.target)? else {
        return Ok(None);
    };
    let mut expected = Decimal::ZERO;
    if !check.multiply.is_empty() {
        let mut product = Decimal::ONE;
        for name in &check.multiply {
            let Some(factor) = scope.number(name)? else {
                return Ok(None);
            };
            product = product.checked_mul(factor).ok_or(Overflow)?;
        }
        expected = product;
    }
    for name in &check.add {
        let Some(term) = scope.number(name)? else {
            return Ok(None);
        };
        expected = expected.checked_add(term).ok_or(Overflow)?;
    }
    for name in &check.subtract {
        if !scope.contains(name) {
            continue;
        }
        let Some(term) = scope.number(name)? else {
            return Ok(None);
        };
        expected = expected.checked_sub(term).ok_or(Overflow)?;
    }
    Ok(Some((actual, expected)))
}

fn present<'a>(record: &'a ReconciledRecord, field: &str) -> Option<&'a FieldValue> {
    record.get(field).filter(|v| !v.is_empty())
}

fn describe(check: &ArithmeticCheck) -> String {
    let mut terms = Vec::new();
    if !check.multiply.is_empty() {
        terms.push(check.multiply.join(" * "));
    }
    terms.extend(check.add.iter().cloned());
    let mut out = terms.join(" + ");
    for name in &check.subtract {
        out.push_str(" - ");
        out.push_str(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::ListItem;
    use crate::models::report::Severity;
    use crate::schema::SchemaRegistry;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use std::sync::Arc;

    fn schema(document_type: DocumentType) -> Arc<ExtractionSchema> {
        SchemaRegistry::embedded()
            .unwrap()
            .load_schema(document_type)
            .unwrap()
    }

    fn num(s: &str) -> FieldValue {
        FieldValue::Number(Decimal::from_str(s).unwrap())
    }

    fn record(fields: &[(&str, FieldValue)]) -> ReconciledRecord {
        fields
            .iter()
            .fold(ReconciledRecord::default(), |r, (k, v)| r.with_edit(k, v.clone()))
    }

    fn valid_invoice() -> ReconciledRecord {
        record(&[
            ("invoice_number", FieldValue::text("INV-1")),
            ("invoice_date", FieldValue::text("2024-03-15")),
            ("vendor_name", FieldValue::text("Acme")),
            ("subtotal", num("80.00")),
            ("tax", num("8.00")),
            ("total", num("88.00")),
        ])
    }

    fn validator() -> Validator {
        Validator::new(&ValidationConfig::default())
    }

    #[test]
    fn test_valid_invoice_has_no_issues() {
        let issues = validator().validate(&valid_invoice(), &schema(DocumentType::Invoice), DocumentType::Invoice);
        assert_eq!(issues, vec![]);
    }

    #[test]
    fn test_each_missing_required_field_is_one_error() {
        let r = valid_invoice().without("invoice_number").without("vendor_name");
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        let missing: Vec<&str> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingRequired)
            .map(|i| i.field.as_str())
            .collect();
        assert_eq!(missing, vec!["invoice_number", "vendor_name"]);
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
    }

    #[test]
    fn test_total_mismatch_suggests_computed_value() {
        let r = valid_invoice().with_edit("total", num("90.00"));
        let schema = schema(DocumentType::Invoice);
        let issues = validator().validate(&r, &schema, DocumentType::Invoice);
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.field, "total");
        assert_eq!(issue.kind, IssueKind::Arithmetic);
        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(issue.suggested_correction, Some(num("88.00")));
        assert_eq!(validator().suggest_correction(issue, &r, &schema), Some(num("88.00")));
    }

    #[test]
    fn test_within_tolerance_passes() {
        let r = valid_invoice().with_edit("total", num("88.01"));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_bill_payments_default_to_zero() {
        let base = record(&[
            ("account_number", FieldValue::text("12345")),
            ("statement_date", FieldValue::text("2024-02-01")),
            ("service_provider", FieldValue::text("City Power")),
            ("previous_balance", num("145.30")),
            ("current_charges", num("89.45")),
        ]);
        let schema = schema(DocumentType::Bill);

        let ok = base.clone().with_edit("total_amount_due", num("234.75"));
        assert!(validator().validate(&ok, &schema, DocumentType::Bill).is_empty());

        let paid = ok.with_edit("payments", num("145.30"));
        let issues = validator().validate(&paid, &schema, DocumentType::Bill);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].suggested_correction, Some(num("89.45")));

        // without previous_balance the check cannot be evaluated
        let partial = base
            .without("previous_balance")
            .with_edit("total_amount_due", num("1.00"));
        assert!(validator().validate(&partial, &schema, DocumentType::Bill).is_empty());
    }

    #[test]
    fn test_type_mismatch_with_coercion() {
        let r = valid_invoice()
            .with_edit("invoice_date", FieldValue::text("issued 15.03.2024"))
            .with_edit("total", FieldValue::text("about 88.00"));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        let mismatches: Vec<&ValidationIssue> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::TypeMismatch)
            .collect();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].field, "invoice_date");
        assert_eq!(mismatches[0].suggested_correction, Some(FieldValue::text("2024-03-15")));
        assert_eq!(mismatches[1].suggested_correction, Some(num("88.00")));
    }

    #[test]
    fn test_rule_violations_are_warnings() {
        let r = valid_invoice()
            .with_edit("due_date", FieldValue::text("2024-03-01"))
            .with_edit("currency", FieldValue::text("USD"))
            .with_edit("vendor_email", FieldValue::text("not an email"));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["due_date", "vendor_email"]);
        assert!(issues.iter().all(|i| i.kind == IssueKind::RuleViolation));
        assert!(issues.iter().all(|i| !i.is_error()));
    }

    #[test]
    fn test_amounts_near_decimal_max_do_not_panic() {
        let max = Decimal::MAX;
        let r = valid_invoice()
            .with_edit("subtotal", FieldValue::Number(max))
            .with_edit("tax", FieldValue::Number(max))
            .with_edit("total", num("1"));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "total");
        assert_eq!(issues[0].kind, IssueKind::Arithmetic);
        assert!(issues[0].message.contains("out of range"));
        assert_eq!(issues[0].suggested_correction, None);

        // the sum fits but the difference to the target does not
        let r = valid_invoice()
            .with_edit("subtotal", FieldValue::Number(Decimal::MIN))
            .with_edit("tax", num("0"))
            .with_edit("total", FieldValue::Number(max));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        let arithmetic: Vec<&ValidationIssue> =
            issues.iter().filter(|i| i.kind == IssueKind::Arithmetic).collect();
        assert_eq!(arithmetic.len(), 1);
        assert_eq!(arithmetic[0].suggested_correction, Some(FieldValue::Number(Decimal::MIN)));
    }

    fn entry(cells: &[(&str, FieldValue)]) -> ListItem {
        cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_line_item_checks() {
        let items = FieldValue::List(vec![
            entry(&[
                ("description", FieldValue::text("Widget")),
                ("quantity", num("2")),
                ("unit_price", num("40.00")),
                ("total", num("75.00")),
            ]),
            entry(&[("quantity", num("1")), ("unit_price", num("5.00")), ("total", num("5.00"))]),
        ]);
        let r = valid_invoice().with_edit("items", items);
        let schema = schema(DocumentType::Invoice);
        let issues = validator().validate(&r, &schema, DocumentType::Invoice);

        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["items[0].total", "items[1].description"]);
        assert_eq!(issues[0].kind, IssueKind::Arithmetic);
        assert_eq!(issues[0].suggested_correction, Some(num("80.00")));
        assert_eq!(issues[1].severity, Severity::Error);
        assert_eq!(validator().suggest_correction(&issues[0], &r, &schema), Some(num("80.00")));

        let fixed = r.apply_corrections(&issues);
        assert_eq!(fixed.get_path("items[0].total"), Some(&num("80.00")));
    }

    #[test]
    fn test_item_totals_must_add_up_to_subtotal() {
        let line = |total: &str| {
            entry(&[
                ("description", FieldValue::text("Part")),
                ("quantity", num("1")),
                ("unit_price", num(total)),
                ("total", num(total)),
            ])
        };
        let r = valid_invoice().with_edit("items", FieldValue::List(vec![line("50.00"), line("20.00")]));
        let issues = validator().validate(&r, &schema(DocumentType::Invoice), DocumentType::Invoice);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "subtotal");
        assert!(issues[0].message.contains("items[].total"));
        assert_eq!(issues[0].suggested_correction, Some(num("70.00")));

        // an entry without a total leaves the sum unknown
        let partial = valid_invoice().with_edit(
            "items",
            FieldValue::List(vec![line("50.00"), entry(&[("description", FieldValue::text("Misc"))])]),
        );
        let issues = validator().validate(&partial, &schema(DocumentType::Invoice), DocumentType::Invoice);
        assert!(issues.iter().all(|i| i.field != "subtotal"));
    }

    #[test]
    fn test_prescription_needs_complete_medications() {
        let schema = schema(DocumentType::Prescription);
        let base = record(&[
            ("date_prescribed", FieldValue::text("2024-03-01")),
            ("patient_name", FieldValue::text("Jane Roe")),
            ("doctor_name", FieldValue::text("Dr. Lee")),
        ]);

        let none = base.clone().with_edit("medications", FieldValue::List(vec![]));
        let issues = validator().validate(&none, &schema, DocumentType::Prescription);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "medications");
        assert_eq!(issues[0].kind, IssueKind::MissingRequired);
        assert!(issues[0].message.contains("at least one"));

        let partial = base.with_edit(
            "medications",
            FieldValue::List(vec![entry(&[
                ("name", FieldValue::text("Amoxicillin")),
                ("quantity", num("30")),
                ("directions", FieldValue::text("1 tablet 3x daily")),
                ("refills", num("-1")),
            ])]),
        );
        let issues = validator().validate(&partial, &schema, DocumentType::Prescription);
        let found: Vec<(&str, Severity)> = issues.iter().map(|i| (i.field.as_str(), i.severity)).collect();
        assert_eq!(
            found,
            vec![
                ("medications[0].strength", Severity::Error),
                ("medications[0].refills", Severity::Warning),
            ]
        );
    }

    #[test]
    fn test_corrections_can_be_applied() {
        let r = valid_invoice().with_edit("total", num("90.00"));
        let schema = schema(DocumentType::Invoice);
        let issues = validator().validate(&r, &schema, DocumentType::Invoice);
        let fixed = r.apply_corrections(&issues);
        assert_eq!(fixed.get("total"), Some(&num("88.00")));
        assert!(validator().validate(&fixed, &schema, DocumentType::Invoice).is_empty());
    }
}
