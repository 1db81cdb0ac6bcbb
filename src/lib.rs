//! A small document-store client over the `OP_MSG` wire protocol.
//!
//! [`Operator`] is the entry point: it owns one connection, one bound
//! collection and at most one cursor, and exposes count, select/read,
//! insert, upsert-update, remove and index creation with JSON text in and
//! `bson::Document` out. [`server::MemoryServer`] speaks the same protocol
//! from memory for tests and local work.

pub mod cli;
pub mod collection;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod document;
pub mod errors;
pub mod operator;
pub mod query;
pub mod server;
pub mod types;
pub mod utils;
pub mod wire;

pub use bson::Document;
pub use collection::CollectionHandle;
pub use config::ClientConfig;
pub use connection::{ClientOptions, Connection};
pub use cursor::Cursor;
pub use errors::DbError;
pub use operator::{INVALID_OPERATOR, Operator};
pub use types::{ConnectionConfig, CursorState, OperatorState};

/// Configure logging from `DOCBRIDGE_LOG_*` variables.
///
/// # Errors
/// Fails when the log directory or files cannot be created.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    utils::logger::configure_from_env()
}
