use bson::{Bson, Document, doc};

/// Filter text matching every document.
pub const MATCH_ALL: &str = "{}";

/// Options of a `find`. Unset fields are left to the server's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub batch_size: Option<u32>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

/// The three documents of a single-document update: which document, what to
/// change, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    pub filter: Document,
    pub update: Document,
    pub options: Document,
}

impl UpdateSpec {
    #[must_use]
    pub fn upsert(&self) -> bool {
        matches!(self.options.get("upsert"), Some(Bson::Boolean(true)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    pub name: String,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub options: IndexOptions,
}

impl IndexModel {
    /// The entry for a `createIndexes` command's `indexes` array.
    #[must_use]
    pub fn to_document(&self) -> Document {
        doc! {
            "key": self.keys.clone(),
            "name": self.options.name.as_str(),
            "unique": self.options.unique,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertReport {
    pub inserted_id: Bson,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}
