use crate::query::MATCH_ALL;

/// One CLI action against the configured collection. Filters and documents
/// are JSON text, exactly as the operator takes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Count {
        filter: String,
    },
    Find {
        filter: String,
        limit: Option<i64>,
        skip: Option<u64>,
        batch_size: Option<u32>,
        sort: Option<String>,
        projection: Option<String>,
    },
    Insert {
        document: String,
    },
    // Always an upsert.
    Update {
        filter: String,
        body: String,
    },
    Remove {
        filter: String,
    },
    RemoveAll,
    CreateIndex {
        key: String,
        ascending: bool,
        unique: bool,
    },
}

impl Command {
    #[must_use]
    pub fn find_all() -> Self {
        Self::Find { filter: MATCH_ALL.into(), limit: None, skip: None, batch_size: None, sort: None, projection: None }
    }
}
