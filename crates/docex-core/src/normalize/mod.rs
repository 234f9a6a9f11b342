//! Value normalization shared by the extractor, confidence engine and validator.

pub mod amounts;
pub mod dates;
pub mod patterns;
pub mod text;

pub use amounts::{amount_spans, amounts_in_text, parse_amount};
pub use dates::{dates_in_text, format_date, parse_date};
pub use text::{casefold, collapse_whitespace, token_overlap};
