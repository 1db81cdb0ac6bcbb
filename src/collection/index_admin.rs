use bson::{Document, doc};

use super::core::CollectionHandle;
use crate::cursor::Cursor;
use crate::errors::DbError;
use crate::query::IndexModel;

impl CollectionHandle {
    /// Create one index and return its name. Creating an index that already
    /// exists with the same options succeeds.
    ///
    /// # Errors
    /// `DbError::Index` when the server refuses, e.g. a unique index over
    /// existing duplicates.
    pub fn create_index(&self, model: &IndexModel) -> Result<String, DbError> {
        self.run(doc! { "createIndexes": self.name(), "indexes": [model.to_document()] })
            .map_err(DbError::index)?;
        log::info!(
            target: "docbridge::audit",
            "create index ns={} name={} unique={}",
            self.namespace(),
            model.options.name,
            model.options.unique
        );
        Ok(model.options.name.clone())
    }

    /// Index descriptions as the server reports them.
    ///
    /// # Errors
    /// `DbError::Index` when the listing fails.
    pub fn list_indexes(&self) -> Result<Vec<Document>, DbError> {
        let reply = self.run(doc! { "listIndexes": self.name() }).map_err(DbError::index)?;
        Cursor::from_reply(self, &reply, None)?
            .collect::<Result<Vec<_>, _>>()
    }
}
