//! Stored record types and their [`Document`] bindings.
//!
//! Wire models from `storefront_core::model` are stored as-is. Records that
//! hold data the wire must never see (credentials, raw blobs) get their own
//! types here.

use serde::Serialize;
use serde_json::{json, Value};
use storefront_core::model::{Cart, Invoice, Product, User, UserAuthority};

use super::document::Document;

impl Document for Product {
    fn id(&self) -> String {
        self.id.clone()
    }
}

impl Document for Invoice {
    fn id(&self) -> String {
        self.invoice_id.to_string()
    }
}

impl Document for Cart {
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A user account as stored by the user service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    /// `hex(sha256(salt || password))`.
    pub password_hash: String,
    pub salt: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub authority: UserAuthority,
}

impl UserRecord {
    /// Public view without credentials or contact data.
    #[must_use]
    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            authority: self.authority,
        }
    }
}

impl Document for UserRecord {
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// An uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub id: String,
    pub name: String,
    /// Hex SHA-256 of `body`.
    pub checksum: String,
    pub body: Vec<u8>,
}

impl Document for BlobRecord {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn index(&self) -> anyhow::Result<Value> {
        Ok(json!({
            "id": self.id,
            "name": self.name,
            "checksum": self.checksum,
            "size": self.body.len(),
        }))
    }
}
