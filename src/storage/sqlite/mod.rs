//! SQLite implementation of the publishing store.

mod publishing_store;

pub use publishing_store::SqliteStore;
