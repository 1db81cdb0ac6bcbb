use crate::connection::SharedConnection;
use crate::errors::DbError;

/// A (database, collection) pair bound to a connection.
///
/// Binding is local bookkeeping: nothing is sent to the server until an
/// operation runs.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    pub(super) connection: SharedConnection,
    uri: String,
    database: String,
    name: String,
}

impl CollectionHandle {
    /// # Errors
    /// Returns `DbError::Bind` when the connection is not open.
    pub fn bind(
        connection: &SharedConnection,
        uri: &str,
        database: &str,
        name: &str,
    ) -> Result<Self, DbError> {
        if !connection.lock().is_open() {
            return Err(DbError::Bind("the connection is not open".into()));
        }
        Ok(Self {
            connection: connection.clone(),
            uri: uri.to_string(),
            database: database.to_string(),
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `"<database>.<collection>"`.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    #[must_use]
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}
