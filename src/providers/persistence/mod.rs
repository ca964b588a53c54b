pub mod mem;
pub mod redb;

pub use mem::InMemoryPersistence;
pub use redb::RedbPersistence;
