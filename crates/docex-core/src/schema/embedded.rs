//! Built-in schemas compiled into the binary.

use crate::models::document::DocumentType;

pub(super) static INVOICE: &str = include_str!("../../schemas/invoice.json");
pub(super) static BILL: &str = include_str!("../../schemas/bill.json");
pub(super) static PRESCRIPTION: &str = include_str!("../../schemas/prescription.json");
pub(super) static UNKNOWN: &str = include_str!("../../schemas/unknown.json");

/// Embedded schema source for a document type.
pub(super) fn source(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Invoice => INVOICE,
        DocumentType::Bill => BILL,
        DocumentType::Prescription => PRESCRIPTION,
        DocumentType::Unknown => UNKNOWN,
    }
}
