pub mod db;

pub use db::PgStore;
pub use visitor_insight_core::memory_store::MemoryStore;
