//! Storage engine for Recollect
//!
//! Handles SQLite database operations, schema management and the scoped
//! fact store.

mod connection;
mod migrations;
pub mod queries;
mod store;

pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;
pub use store::MemoryStore;
