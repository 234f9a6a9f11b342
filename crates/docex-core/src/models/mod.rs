//! Data models shared by every pipeline stage.

pub mod config;
pub mod document;
pub mod record;
pub mod report;
