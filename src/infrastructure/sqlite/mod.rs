//! Durable SQLite store variants (WAL mode, embedded schema).

pub mod connection;
pub mod memory_store;
pub mod task_store;

pub use connection::{create_memory_pool, create_pool};
pub use memory_store::SqliteMemoryStore;
pub use task_store::SqliteTaskStore;
