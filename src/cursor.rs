//! Server-side iteration over a `find` result.
//!
//! The first batch arrives with the `find` reply. Further batches are pulled
//! with `getMore` only when the local buffer runs dry, so a cursor never
//! holds more than one batch in memory. A cursor whose server id is still
//! non-zero when it is closed or dropped is killed with `killCursors`.

use bson::{Bson, Document, doc};
use std::collections::VecDeque;

use crate::collection::CollectionHandle;
use crate::connection::SharedConnection;
use crate::document::get_int;
use crate::errors::DbError;
use crate::query::FindOptions;
use crate::types::CursorState;

#[derive(Debug)]
pub struct Cursor {
    connection: SharedConnection,
    database: String,
    collection: String,
    id: i64,
    buffer: VecDeque<Document>,
    batch_size: Option<u32>,
    state: CursorState,
}

impl Cursor {
    /// Run `find` and buffer the first batch.
    ///
    /// # Errors
    /// `DbError::Query` when the server rejects the query or the link fails.
    pub fn open(handle: &CollectionHandle, filter: Document, options: &FindOptions) -> Result<Self, DbError> {
        let mut command = doc! { "find": handle.name(), "filter": filter };
        if let Some(n) = options.batch_size {
            command.insert("batchSize", i64::from(n));
        }
        if let Some(n) = options.limit {
            command.insert("limit", n);
        }
        if let Some(n) = options.skip {
            let skip = i64::try_from(n).map_err(|_| DbError::Query { code: None, message: format!("skip {n} out of range") })?;
            command.insert("skip", skip);
        }
        if let Some(sort) = &options.sort {
            command.insert("sort", sort.clone());
        }
        if let Some(projection) = &options.projection {
            command.insert("projection", projection.clone());
        }
        let reply = handle.run(command).map_err(DbError::query)?;
        Self::from_reply(handle, &reply, options.batch_size)
    }

    /// Wrap the `cursor` sub-document of a `find`-style reply.
    pub(crate) fn from_reply(handle: &CollectionHandle, reply: &Document, batch_size: Option<u32>) -> Result<Self, DbError> {
        let (id, batch) = cursor_batch(reply, "firstBatch")?;
        log::debug!("cursor {id} opened on {} with {} documents", handle.namespace(), batch.len());
        Ok(Self {
            connection: handle.connection().clone(),
            database: handle.database().to_string(),
            collection: handle.name().to_string(),
            id,
            buffer: batch.into(),
            batch_size,
            state: CursorState::Active,
        })
    }

    /// Next document, fetching a new batch when the buffer is drained.
    ///
    /// `Ok(None)` marks the end and is returned again on every later call.
    /// A failed fetch exhausts the cursor.
    ///
    /// # Errors
    /// `DbError::Query` when `getMore` fails.
    pub fn advance(&mut self) -> Result<Option<Document>, DbError> {
        loop {
            if self.state != CursorState::Active {
                return Ok(None);
            }
            if let Some(doc) = self.buffer.pop_front() {
                return Ok(Some(doc));
            }
            if self.id == 0 {
                log::debug!("cursor on {} exhausted", self.namespace());
                self.state = CursorState::Exhausted;
                return Ok(None);
            }
            if let Err(e) = self.get_more() {
                log::warn!("getMore on cursor {} failed: {e}", self.id);
                self.close();
                return Err(e);
            }
        }
    }

    /// Release the server cursor if it is still open. Never fails; a failed
    /// `killCursors` is only logged.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.state = CursorState::Exhausted;
        if self.id == 0 {
            return;
        }
        let id = std::mem::take(&mut self.id);
        let mut conn = self.connection.lock();
        if !conn.is_open() {
            return;
        }
        let command = doc! { "killCursors": self.collection.as_str(), "cursors": [id] };
        match conn.run_command(&self.database, command) {
            Ok(_) => log::debug!("killed cursor {id}"),
            Err(e) => log::warn!("killCursors for cursor {id} failed: {e}"),
        }
    }

    #[must_use]
    pub const fn state(&self) -> CursorState {
        self.state
    }

    /// Server cursor id; 0 once the server has nothing more to send.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Documents fetched but not yet handed out.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    fn get_more(&mut self) -> Result<(), DbError> {
        let mut command = doc! { "getMore": self.id, "collection": self.collection.as_str() };
        if let Some(n) = self.batch_size {
            command.insert("batchSize", i64::from(n));
        }
        let reply = self
            .connection
            .lock()
            .run_command(&self.database, command)
            .map_err(DbError::query)?;
        let (id, batch) = cursor_batch(&reply, "nextBatch")?;
        log::debug!("getMore on cursor {} returned {} documents", self.id, batch.len());
        self.id = id;
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for Cursor {
    type Item = Result<Document, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

fn cursor_batch(reply: &Document, field: &str) -> Result<(i64, Vec<Document>), DbError> {
    let malformed = |what: &str| DbError::Query { code: None, message: format!("malformed cursor reply: {what}") };
    let cursor = reply.get("cursor").and_then(Bson::as_document).ok_or_else(|| malformed("no cursor"))?;
    let id = get_int(cursor, "id").ok_or_else(|| malformed("no cursor id"))?;
    let batch = cursor
        .get(field)
        .and_then(Bson::as_array)
        .ok_or_else(|| malformed(field))?
        .iter()
        .map(|b| b.as_document().cloned().ok_or_else(|| malformed("non-document in batch")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((id, batch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_read_from_the_named_field() {
        let reply = doc! { "cursor": { "id": 42_i64, "ns": "d.c", "firstBatch": [{ "a": 1 }, { "a": 2 }] }, "ok": 1 };
        let (id, batch) = cursor_batch(&reply, "firstBatch").unwrap();
        assert_eq!(id, 42);
        assert_eq!(batch, vec![doc! { "a": 1 }, doc! { "a": 2 }]);
        assert!(cursor_batch(&reply, "nextBatch").is_err());
    }

    #[test]
    fn malformed_replies_are_query_errors() {
        for reply in [
            doc! { "ok": 1 },
            doc! { "cursor": { "firstBatch": [] } },
            doc! { "cursor": { "id": 0, "firstBatch": [1] } },
        ] {
            assert!(matches!(cursor_batch(&reply, "firstBatch"), Err(DbError::Query { .. })));
        }
    }
}
