pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;
pub mod storage;

pub use memory::MemoryStorage;
pub use models::*;
pub use pool::DbPool;
pub use repository::PgStorage;
pub use storage::Storage;
