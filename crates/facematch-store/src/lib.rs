//! facematch-store — SQLite persistence for photo and person documents.
//!
//! Each record is stored whole as a JSON document keyed by its id, so
//! fields owned by other parts of the library survive every write.

mod schema;
mod sqlite;

pub use sqlite::{SchemaError, SqliteStore};
