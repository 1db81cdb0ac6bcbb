//! The facade a caller holds: one connection, one bound collection and at
//! most one cursor, plus the message of the last failure.

use bson::Document;

use crate::collection::CollectionHandle;
use crate::config::ClientConfig;
use crate::connection::{Connection, SharedConnection};
use crate::cursor::Cursor;
use crate::document::to_json;
use crate::errors::DbError;
use crate::query::{
    DeleteReport, FindOptions, InsertReport, MATCH_ALL, UpdateReport, build_index_spec, build_update,
    parse_document, parse_filter,
};
use crate::types::{ConnectionConfig, CursorState, OperatorState};

/// Reported by [`Operator::last_error`] before `init` and after `close`.
pub const INVALID_OPERATOR: &str = "the operator is invalid";

/// Document-store operations against one (database, collection) pair.
///
/// Every operation returns a `Result` and also records its outcome: an empty
/// string on success, the error text on failure. Operations attempted while
/// the operator is not [`OperatorState::Ready`] fail with
/// [`DbError::InvalidOperator`], touch nothing and leave the recorded
/// message alone.
///
/// ```no_run
/// use docbridge::Operator;
///
/// let mut op = Operator::new();
/// op.init("mongodb://localhost:27017/", "test", "nodes")?;
/// op.insert(r#"{"node_id": 111, "node_name": "C111"}"#)?;
/// op.select(r#"{"node_id": 111}"#)?;
/// while let Some(doc) = op.read() {
///     println!("{doc}");
/// }
/// # Ok::<(), docbridge::DbError>(())
/// ```
#[derive(Debug, Default)]
pub struct Operator {
    state: OperatorState,
    config: Option<ConnectionConfig>,
    cursor: Option<Cursor>,
    collection: Option<CollectionHandle>,
    connection: Option<SharedConnection>,
    last_error: Option<String>,
    batch_size: Option<u32>,
}

impl Operator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize an operator from loaded configuration.
    ///
    /// # Errors
    /// Whatever [`Operator::init_with`] fails with.
    pub fn from_config(config: &ClientConfig) -> Result<Self, DbError> {
        let mut op = Self::new();
        op.set_batch_size(config.batch_size);
        op.init_with(config.connection_config())?;
        Ok(op)
    }

    /// Drop any previous session, connect to `uri` and bind `database.table`.
    ///
    /// On failure the operator is left `Uninitialized` with nothing open.
    ///
    /// # Errors
    /// `DbError::InvalidUri`, `DbError::Connect` or `DbError::Bind`.
    pub fn init(&mut self, uri: &str, database: &str, table: &str) -> Result<(), DbError> {
        self.init_with(ConnectionConfig::new(uri, database, table))
    }

    /// # Errors
    /// See [`Operator::init`].
    pub fn init_with(&mut self, config: ConnectionConfig) -> Result<(), DbError> {
        self.teardown();
        self.state = OperatorState::Uninitialized;
        let bound = Connection::connect(&config.uri)
            .map(Connection::into_shared)
            .and_then(|conn| {
                let handle = CollectionHandle::bind(&conn, &config.uri, &config.database, &config.collection)?;
                Ok((conn, handle))
            });
        match bound {
            Ok((conn, handle)) => {
                log::info!("operator ready on {}", handle.namespace());
                self.connection = Some(conn);
                self.collection = Some(handle);
                self.config = Some(config);
                self.state = OperatorState::Ready;
                self.last_error = Some(String::new());
                Ok(())
            }
            Err(e) => {
                log::warn!("init against {} failed: {e}", config.uri);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// # Errors
    /// `DbError::Parse` for malformed filter text, `DbError::Query` when the
    /// server refuses.
    pub fn count(&mut self, filter: &str) -> Result<i64, DbError> {
        let result = self.ready().and_then(|handle| {
            let filter = parse_filter(filter)?;
            handle.count(&filter)
        });
        self.record("count", result)
    }

    /// # Errors
    /// See [`Operator::count`].
    pub fn count_all(&mut self) -> Result<i64, DbError> {
        self.count(MATCH_ALL)
    }

    /// # Errors
    /// `DbError::Index` when the server refuses the index.
    pub fn create_index(&mut self, key: &str, ascending: bool, unique: bool) -> Result<(), DbError> {
        let result = self
            .ready()
            .and_then(|handle| handle.create_index(&build_index_spec(key, ascending, unique)))
            .map(|_| ());
        self.record("create_index", result)
    }

    /// Ascending unique index on `key`.
    ///
    /// # Errors
    /// See [`Operator::create_index`].
    pub fn create_index_default(&mut self, key: &str) -> Result<(), DbError> {
        self.create_index(key, true, true)
    }

    /// Open a cursor over documents matching `filter`, replacing any previous
    /// cursor. Malformed text leaves the previous cursor in place.
    ///
    /// # Errors
    /// `DbError::Parse` or `DbError::Query`.
    pub fn select(&mut self, filter: &str) -> Result<(), DbError> {
        let options = FindOptions { batch_size: self.batch_size, ..FindOptions::default() };
        self.select_with(filter, &options)
    }

    /// # Errors
    /// See [`Operator::select`].
    pub fn select_all(&mut self) -> Result<(), DbError> {
        self.select(MATCH_ALL)
    }

    /// # Errors
    /// See [`Operator::select`].
    pub fn select_with(&mut self, filter: &str, options: &FindOptions) -> Result<(), DbError> {
        let parsed = self.ready().map(|_| ()).and_then(|()| parse_filter(filter));
        let result = match parsed {
            Ok(filter) => {
                self.cursor = None;
                self.ready().and_then(|handle| handle.find(filter, options))
            }
            Err(e) => Err(e),
        };
        let result = result.map(|cursor| self.cursor = Some(cursor));
        self.record("select", result)
    }

    /// Next document of the current cursor.
    ///
    /// `None` means no cursor, an exhausted cursor, or a failed fetch; the
    /// last failure tells these apart.
    pub fn read(&mut self) -> Option<Document> {
        let result = match (self.ready().is_ok(), self.cursor.as_mut()) {
            (true, Some(cursor)) => cursor.advance(),
            // No cursor to read: nothing happened, nothing to record.
            (true, None) => return None,
            (false, _) => Err(DbError::InvalidOperator),
        };
        self.record("read", result).ok().flatten()
    }

    /// [`Operator::read`] rendered as relaxed extended JSON.
    pub fn read_json(&mut self) -> Option<String> {
        self.read().map(|doc| to_json(&doc))
    }

    /// # Errors
    /// `DbError::Parse` or `DbError::Write`.
    pub fn insert(&mut self, document: &str) -> Result<InsertReport, DbError> {
        let result = self.ready().and_then(|handle| {
            let document = parse_document(document)?;
            handle.insert_one(&document)
        });
        self.record("insert", result)
    }

    /// Set the fields of `body` on the first document matching `filter`,
    /// inserting filter plus body when nothing matches. Always an upsert.
    ///
    /// # Errors
    /// `DbError::Parse` or `DbError::Write`.
    pub fn update(&mut self, filter: &str, body: &str) -> Result<UpdateReport, DbError> {
        let result = self.ready().and_then(|handle| {
            let spec = build_update(filter, body)?;
            handle.update_one(&spec)
        });
        self.record("update", result)
    }

    /// Delete at most one document matching `filter`.
    ///
    /// # Errors
    /// `DbError::Parse` or `DbError::Write`.
    pub fn remove(&mut self, filter: &str) -> Result<DeleteReport, DbError> {
        let result = self.ready().and_then(|handle| {
            let filter = parse_filter(filter)?;
            handle.delete_one(&filter)
        });
        self.record("remove", result)
    }

    /// Delete every document.
    ///
    /// # Errors
    /// `DbError::Write`.
    pub fn remove_all(&mut self) -> Result<DeleteReport, DbError> {
        let result = self.ready().and_then(|handle| handle.delete_many(&Document::new()));
        self.record("remove_all", result)
    }

    /// Release cursor, collection and connection. The operator stays usable
    /// through a new `init`.
    pub fn close(&mut self) {
        self.teardown();
        if self.state == OperatorState::Ready {
            log::info!("operator closed");
        }
        self.state = OperatorState::Closed;
        self.last_error = None;
    }

    pub fn exit(&mut self) {
        self.close();
    }

    /// Message of the most recent failure, empty after a success.
    #[must_use]
    pub fn last_error(&self) -> &str {
        self.last_error.as_deref().unwrap_or(INVALID_OPERATOR)
    }

    #[must_use]
    pub fn what(&self) -> &str {
        self.last_error()
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.uri.as_str())
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.database.as_str())
    }

    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.collection.as_str())
    }

    #[must_use]
    pub const fn state(&self) -> OperatorState {
        self.state
    }

    #[must_use]
    pub fn cursor_state(&self) -> CursorState {
        self.cursor.as_ref().map_or(CursorState::Absent, Cursor::state)
    }

    /// Batch size requested by later `select` calls; `None` leaves it to the
    /// server.
    pub fn set_batch_size(&mut self, batch_size: Option<u32>) {
        self.batch_size = batch_size.filter(|n| *n > 0);
    }

    #[must_use]
    pub const fn batch_size(&self) -> Option<u32> {
        self.batch_size
    }

    fn ready(&self) -> Result<&CollectionHandle, DbError> {
        match (self.state, &self.collection) {
            (OperatorState::Ready, Some(handle)) => Ok(handle),
            _ => Err(DbError::InvalidOperator),
        }
    }

    fn record<T>(&mut self, op: &str, result: Result<T, DbError>) -> Result<T, DbError> {
        match &result {
            Ok(_) => self.last_error = Some(String::new()),
            Err(DbError::InvalidOperator) => log::debug!("{op} refused: {}", DbError::InvalidOperator),
            Err(e) => {
                log::warn!("{op} failed: {e}");
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    // Reverse acquisition order: cursor, collection, connection.
    fn teardown(&mut self) {
        self.config = None;
        self.cursor = None;
        self.collection = None;
        if let Some(conn) = self.connection.take() {
            conn.lock().close();
        }
    }
}

impl Drop for Operator {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_operator_reports_the_sentinel() {
        let op = Operator::new();
        assert_eq!(op.state(), OperatorState::Uninitialized);
        assert_eq!(op.last_error(), INVALID_OPERATOR);
        assert_eq!(op.what(), INVALID_OPERATOR);
        assert_eq!(op.cursor_state(), CursorState::Absent);
        assert!(op.uri().is_none());
    }

    #[test]
    fn every_operation_refuses_before_init() {
        let mut op = Operator::new();
        assert!(matches!(op.count_all(), Err(DbError::InvalidOperator)));
        assert!(matches!(op.count("not json"), Err(DbError::InvalidOperator)));
        assert!(matches!(op.create_index_default("k"), Err(DbError::InvalidOperator)));
        assert!(matches!(op.select_all(), Err(DbError::InvalidOperator)));
        assert!(matches!(op.insert("{}"), Err(DbError::InvalidOperator)));
        assert!(matches!(op.update("{}", "{}"), Err(DbError::InvalidOperator)));
        assert!(matches!(op.remove("{}"), Err(DbError::InvalidOperator)));
        assert!(matches!(op.remove_all(), Err(DbError::InvalidOperator)));
        assert!(op.read().is_none());
        assert!(op.read_json().is_none());
        assert_eq!(op.last_error(), INVALID_OPERATOR);
    }

    #[test]
    fn failed_init_is_recorded_and_not_overwritten() {
        let mut op = Operator::new();
        let err = op.init("http://nowhere", "db", "c").unwrap_err();
        assert!(matches!(err, DbError::InvalidUri(_)));
        assert_eq!(op.state(), OperatorState::Uninitialized);
        let message = op.last_error().to_string();
        assert!(message.contains("invalid URI"), "{message}");
        assert!(op.count_all().is_err());
        assert_eq!(op.last_error(), message);
        assert!(op.database().is_none());
    }

    #[test]
    fn close_without_init_is_harmless() {
        let mut op = Operator::new();
        op.close();
        op.exit();
        assert_eq!(op.state(), OperatorState::Closed);
        assert_eq!(op.last_error(), INVALID_OPERATOR);
    }

    #[test]
    fn zero_batch_size_means_server_default() {
        let mut op = Operator::new();
        op.set_batch_size(Some(0));
        assert_eq!(op.batch_size(), None);
        op.set_batch_size(Some(5));
        assert_eq!(op.batch_size(), Some(5));
    }
}
