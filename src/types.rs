use serde::{Deserialize, Serialize};

/// Lifecycle of an [`Operator`](crate::Operator). Data operations run only in
/// `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatorState {
    #[default]
    Uninitialized,
    Ready,
    Closed,
}

/// Where the operator's cursor stands. `Exhausted` behaves exactly like
/// `Absent` for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    #[default]
    Absent,
    Active,
    Exhausted,
}

/// Endpoint plus the (database, collection) pair an operator is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(uri: impl Into<String>, database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { uri: uri.into(), database: database.into(), collection: collection.into() }
    }
}
