//! Text → document builders for filters, updates and index specs.
//!
//! Everything here is pure: no I/O, and the only failure is malformed input
//! text, reported as `DbError::Parse` before anything reaches the wire.

mod parse;
mod types;

pub use parse::{build_index_spec, build_update, parse_document, parse_filter};
pub use types::{
    DeleteReport, FindOptions, IndexModel, IndexOptions, InsertReport, MATCH_ALL, UpdateReport,
    UpdateSpec,
};
