//! Storage collaborator for the domain services.
//!
//! - [`document`]: the [`DocumentStore`] contract and query types
//! - [`engines`]: backend implementations ([`MemoryStore`])
//! - [`records`]: stored record types
//! - [`factory`]: resolves a [`StorageConfig`] into [`Stores`]

pub mod document;
pub mod engines;
pub mod factory;
pub mod records;

pub use document::{Document, DocumentStore, FieldQuery, Page, Sort};
pub use engines::MemoryStore;
pub use factory::{open, SharedStore, StorageBackend, StorageConfig, Stores};
pub use records::{BlobRecord, UserRecord};
