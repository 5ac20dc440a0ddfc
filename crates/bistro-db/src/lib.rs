pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ChatStore, RatingStore, StoreError};
