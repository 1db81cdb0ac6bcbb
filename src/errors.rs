use thiserror::Error;

use crate::wire::WireError;

/// Server code reported for a unique index violation.
pub const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("bind error: {0}")]
    Bind(String),

    #[error("query error: {message}")]
    Query { code: Option<i32>, message: String },

    #[error("write error: {message}")]
    Write { code: Option<i32>, message: String },

    #[error("index error: {message}")]
    Index { code: Option<i32>, message: String },

    #[error("the operator is invalid")]
    InvalidOperator,

    #[error("config error: {0}")]
    Config(String),
}

impl DbError {
    pub(crate) fn query(e: WireError) -> Self {
        Self::Query { code: e.code(), message: e.to_string() }
    }

    pub(crate) fn write(e: WireError) -> Self {
        Self::Write { code: e.code(), message: e.to_string() }
    }

    pub(crate) fn index(e: WireError) -> Self {
        Self::Index { code: e.code(), message: e.to_string() }
    }

    /// Server error code, when the failure came from a server reply.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Query { code, .. } | Self::Write { code, .. } | Self::Index { code, .. } => *code,
            _ => None,
        }
    }

    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        self.code() == Some(DUPLICATE_KEY)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
