mod core;
mod index_admin;
mod ops;

pub use self::core::CollectionHandle;
pub use ops::BSON_OBJECT_TOO_LARGE;
