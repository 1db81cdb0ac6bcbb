//! A single blocking link to a document store.

mod core;
mod uri;

pub use self::core::{Connection, ServerInfo, SharedConnection};
pub use uri::{ClientOptions, DEFAULT_PORT, ServerAddress};
