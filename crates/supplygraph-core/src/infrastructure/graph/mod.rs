//! Graph store implementations
//!
//! - `memory`: `InMemoryGraphStore`, the default for tests and embedding
//! - `sqlite`: `SqliteGraphStore`, persistent storage through sqlx

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;
