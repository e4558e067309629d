//! Destination and source storage: typed values and SQLite access

pub mod schema;
pub mod sqlite;
pub mod value;

pub use sqlite::connect;
pub use value::{Value, ValueError};
