//! Resolves a [`StorageConfig`] into the stores each domain service uses.
//!
//! Selection happens once, at startup. The stores are handed to the services
//! explicitly; nothing looks a backend up by name afterwards.

use std::str::FromStr;
use std::sync::Arc;

use storefront_core::model::{Cart, Invoice, Product};

use super::document::{Document, DocumentStore};
use super::engines::MemoryStore;
use super::records::{BlobRecord, UserRecord};

/// Shared handle to one collection.
pub type SharedStore<T> = Arc<dyn DocumentStore<T>>;

/// Available storage backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
    #[default]
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// Every collection a node may need. A node only serves the ones its service
/// touches; the rest stay empty.
#[derive(Clone)]
pub struct Stores {
    pub products: SharedStore<Product>,
    pub blobs: SharedStore<BlobRecord>,
    pub users: SharedStore<UserRecord>,
    pub orders: SharedStore<Invoice>,
    pub carts: SharedStore<Cart>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("products", &self.products.len())
            .field("blobs", &self.blobs.len())
            .field("users", &self.users.len())
            .field("orders", &self.orders.len())
            .field("carts", &self.carts.len())
            .finish()
    }
}

/// Opens every collection with the configured backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened.
pub fn open(config: &StorageConfig) -> anyhow::Result<Stores> {
    Ok(Stores {
        products: collection(config.backend)?,
        blobs: collection(config.backend)?,
        users: collection(config.backend)?,
        orders: collection(config.backend)?,
        carts: collection(config.backend)?,
    })
}

fn collection<T: Document>(backend: StorageBackend) -> anyhow::Result<SharedStore<T>> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::<T>::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_opens_empty_stores() {
        let stores = open(&StorageConfig::default()).unwrap();
        assert!(stores.products.is_empty());
        assert!(stores.orders.is_empty());
    }

    #[test]
    fn stores_are_independent() {
        let stores = open(&StorageConfig::default()).unwrap();
        stores
            .carts
            .upsert(Cart {
                id: "c1".to_string(),
                ..Cart::default()
            })
            .unwrap();
        assert_eq!(stores.carts.len(), 1);
        assert!(stores.products.is_empty());
    }

    #[test]
    fn backend_parses_from_flag_value() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("postgres".parse::<StorageBackend>().is_err());
    }
}
