pub mod db;
pub mod facts;
pub mod memory;

pub use db::Db;
pub use memory::{MemoryStore, MemoryTables, RowCounts};
