//! Collaborators the counter core talks to, plus concrete backends.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::JsonFileMetaStore;
pub use memory::{MemoryMetaStore, MemorySink, ViewAggregate};
pub use traits::{EntityCache, MetaStore, PersistenceSink, ViewDelta};

#[cfg(test)]
pub use traits::MockMetaStore;
