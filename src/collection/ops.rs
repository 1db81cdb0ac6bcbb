use bson::{Bson, Document, doc, oid::ObjectId};

use super::core::CollectionHandle;
use crate::cursor::Cursor;
use crate::document::{get_int, get_str};
use crate::errors::DbError;
use crate::query::{DeleteReport, FindOptions, InsertReport, UpdateReport, UpdateSpec};
use crate::wire::WireError;

const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server code for a document over `maxBsonObjectSize`.
pub const BSON_OBJECT_TOO_LARGE: i32 = 10334;

impl CollectionHandle {
    pub(crate) fn run(&self, command: Document) -> Result<Document, WireError> {
        self.connection.lock().run_command(self.database(), command)
    }

    /// Number of documents matching `filter`.
    ///
    /// # Errors
    /// `DbError::Query` when the server rejects the filter or the link fails.
    pub fn count(&self, filter: &Document) -> Result<i64, DbError> {
        let reply = self
            .run(doc! { "count": self.name(), "query": filter.clone() })
            .map_err(DbError::query)?;
        get_int(&reply, "n")
            .ok_or_else(|| DbError::Query { code: None, message: "count reply has no 'n'".into() })
    }

    /// # Errors
    /// `DbError::Query` when the server rejects the find.
    pub fn find(&self, filter: Document, options: &FindOptions) -> Result<Cursor, DbError> {
        Cursor::open(self, filter, options)
    }

    /// Insert one document. A missing `_id` is generated client side and
    /// placed first.
    ///
    /// # Errors
    /// `DbError::Write` carrying the server code, e.g. 11000 for a
    /// duplicate key.
    pub fn insert_one(&self, document: &Document) -> Result<InsertReport, DbError> {
        let (document, id) = with_id(document);
        self.check_size(&document)?;
        let reply = self
            .run(doc! { "insert": self.name(), "documents": [document], "ordered": true })
            .and_then(check_write_reply)
            .map_err(DbError::write)?;
        log::info!(target: "docbridge::audit", "insert ns={} n={}", self.namespace(), get_int(&reply, "n").unwrap_or(0));
        Ok(InsertReport { inserted_id: id })
    }

    /// Update at most one document according to `spec`.
    ///
    /// # Errors
    /// `DbError::Write` when the server rejects the update.
    pub fn update_one(&self, spec: &UpdateSpec) -> Result<UpdateReport, DbError> {
        self.check_size(&spec.update)?;
        let mut statement = doc! { "q": spec.filter.clone(), "u": spec.update.clone(), "multi": false };
        for (key, value) in &spec.options {
            statement.insert(key.clone(), value.clone());
        }
        let reply = self
            .run(doc! { "update": self.name(), "updates": [statement], "ordered": true })
            .and_then(check_write_reply)
            .map_err(DbError::write)?;
        let upserted_id = reply
            .get("upserted")
            .and_then(Bson::as_array)
            .and_then(|ups| ups.first())
            .and_then(Bson::as_document)
            .and_then(|u| u.get("_id"))
            .cloned();
        let n = count_field(&reply, "n");
        let report = UpdateReport {
            matched: if upserted_id.is_some() { n.saturating_sub(1) } else { n },
            modified: count_field(&reply, "nModified"),
            upserted_id,
        };
        log::info!(
            target: "docbridge::audit",
            "update ns={} matched={} modified={} upserted={}",
            self.namespace(),
            report.matched,
            report.modified,
            report.upserted_id.is_some()
        );
        Ok(report)
    }

    /// # Errors
    /// `DbError::Write` when the server rejects the delete.
    pub fn delete_one(&self, filter: &Document) -> Result<DeleteReport, DbError> {
        self.delete(filter, 1)
    }

    /// # Errors
    /// `DbError::Write` when the server rejects the delete.
    pub fn delete_many(&self, filter: &Document) -> Result<DeleteReport, DbError> {
        self.delete(filter, 0)
    }

    /// Drop the whole collection. Dropping a collection that does not exist
    /// succeeds.
    ///
    /// # Errors
    /// `DbError::Write` for any other server refusal.
    pub fn drop_collection(&self) -> Result<(), DbError> {
        match self.run(doc! { "drop": self.name() }) {
            Ok(_) => {}
            Err(WireError::Command { code: NAMESPACE_NOT_FOUND, .. }) => {}
            Err(e) => return Err(DbError::write(e)),
        }
        log::info!(target: "docbridge::audit", "drop ns={}", self.namespace());
        Ok(())
    }

    // Documents larger than the handshake's maxBsonObjectSize never leave
    // the client.
    fn check_size(&self, document: &Document) -> Result<(), DbError> {
        let limit = self.connection.lock().server_info().max_bson_object_size;
        let mut encoded = Vec::new();
        document
            .to_writer(&mut encoded)
            .map_err(|e| DbError::Write { code: None, message: e.to_string() })?;
        if encoded.len() > limit {
            return Err(DbError::Write {
                code: Some(BSON_OBJECT_TOO_LARGE),
                message: format!("document of {} bytes exceeds the server limit of {limit}", encoded.len()),
            });
        }
        Ok(())
    }

    fn delete(&self, filter: &Document, limit: i32) -> Result<DeleteReport, DbError> {
        let reply = self
            .run(doc! {
                "delete": self.name(),
                "deletes": [{ "q": filter.clone(), "limit": limit }],
                "ordered": true,
            })
            .and_then(check_write_reply)
            .map_err(DbError::write)?;
        let report = DeleteReport { deleted: count_field(&reply, "n") };
        log::info!(target: "docbridge::audit", "delete ns={} deleted={}", self.namespace(), report.deleted);
        Ok(report)
    }
}

fn with_id(document: &Document) -> (Document, Bson) {
    if let Some(id) = document.get("_id") {
        return (document.clone(), id.clone());
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut out = Document::new();
    out.insert("_id", id.clone());
    for (key, value) in document {
        out.insert(key.clone(), value.clone());
    }
    (out, id)
}

/// A write can be acknowledged with `ok: 1` and still have failed per
/// statement; surface the first such failure.
fn check_write_reply(reply: Document) -> Result<Document, WireError> {
    let first_error = reply
        .get("writeErrors")
        .and_then(Bson::as_array)
        .and_then(|errors| errors.first())
        .and_then(Bson::as_document)
        .or_else(|| reply.get("writeConcernError").and_then(Bson::as_document));
    if let Some(err) = first_error {
        return Err(WireError::Command {
            code: get_int(err, "code").and_then(|c| i32::try_from(c).ok()).unwrap_or(8),
            code_name: get_str(err, "codeName").map(str::to_string),
            message: get_str(err, "errmsg").unwrap_or("write failed").to_string(),
        });
    }
    Ok(reply)
}

fn count_field(reply: &Document, key: &str) -> u64 {
    get_int(reply, key).and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_goes_first() {
        let (d, id) = with_id(&doc! { "a": 1, "b": 2 });
        assert_eq!(d.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(d.get("_id"), Some(&id));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn caller_id_is_kept() {
        let (d, id) = with_id(&doc! { "a": 1, "_id": 7 });
        assert_eq!(id, Bson::Int32(7));
        assert_eq!(d, doc! { "a": 1, "_id": 7 });
    }

    #[test]
    fn write_errors_become_command_errors() {
        let reply = doc! {
            "ok": 1.0,
            "n": 0,
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "E11000 duplicate key" }],
        };
        let err = check_write_reply(reply).unwrap_err();
        assert_eq!(err.code(), Some(11000));
        assert!(err.to_string().contains("E11000"));
        assert!(check_write_reply(doc! { "ok": 1.0, "n": 1 }).is_ok());
    }
}
