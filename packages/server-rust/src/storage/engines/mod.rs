//! Concrete [`DocumentStore`](crate::storage::DocumentStore) implementations.

pub mod memory;

pub use memory::MemoryStore;
