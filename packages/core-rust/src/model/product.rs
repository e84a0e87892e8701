use serde::{Deserialize, Serialize};

/// A catalog product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Decimal price kept as text so no precision is lost in transit.
    pub price: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(rename = "catalogID")]
    pub catalog_id: String,
    pub status: i32,
    pub thumbnails: Vec<String>,
}

/// Sums two integers. `userid` and `size` are accepted as legacy names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetProductsRequest {
    #[serde(alias = "userid")]
    pub a: i64,
    #[serde(alias = "size")]
    pub b: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetProductsResponse {
    pub v: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub product: Product,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateProductResponse {
    pub id: String,
}

/// An uploaded product image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadRequest {
    pub name: String,
    /// Hex SHA-256 of `body`; empty when the caller did not compute one.
    pub checksum: String,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
}
