use bson::{Bson, Document, doc};
use serde::Deserialize;

use super::types::{IndexModel, IndexOptions, UpdateSpec};
use crate::errors::DbError;

// Serde-facing shape of caller text: a JSON object, read in field order.
// Extended JSON wrappers such as {"$oid": ...} become their BSON types.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct DocumentSerde(Document);

/// Parse a JSON object into a document, keeping field order.
///
/// # Errors
/// Returns `DbError::Parse` when the text is not a JSON object.
pub fn parse_document(text: &str) -> Result<Document, DbError> {
    let parsed: DocumentSerde = serde_json::from_str(text)?;
    Ok(parsed.0)
}

/// Parse filter text. `"{}"` matches every document.
///
/// # Errors
/// Returns `DbError::Parse` when the text is not a JSON object.
pub fn parse_filter(text: &str) -> Result<Document, DbError> {
    parse_document(text)
}

/// Build a single-document update from filter text and the body of fields
/// to set.
///
/// The body is wrapped as `{"$set": body}` and the update always runs as an
/// upsert: when nothing matches, a document built from the filter's equality
/// fields plus the body is inserted. There is no non-upsert form.
///
/// # Errors
/// Returns `DbError::Parse` when either text is not a JSON object.
pub fn build_update(filter_text: &str, body_text: &str) -> Result<UpdateSpec, DbError> {
    let filter = parse_filter(filter_text)?;
    let body = parse_document(body_text)?;
    Ok(UpdateSpec {
        filter,
        update: doc! { "$set": body },
        options: doc! { "upsert": true },
    })
}

/// Keys `{key: 1}` (or `-1` when descending) and the conventional index
/// name `"<key>_<direction>"`.
#[must_use]
pub fn build_index_spec(key: &str, ascending: bool, unique: bool) -> IndexModel {
    let direction: i32 = if ascending { 1 } else { -1 };
    let mut keys = Document::new();
    keys.insert(key, Bson::Int32(direction));
    IndexModel {
        keys,
        options: IndexOptions { name: format!("{key}_{direction}"), unique },
    }
}
