pub mod memory;
pub mod store;

pub use memory::MemoryExecutionStore;
pub use store::SqliteExecutionStore;
