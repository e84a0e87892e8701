//! Product catalog: the `GetProducts` sum check, product creation and image upload.

use sha2::{Digest, Sha256};
use storefront_core::model::{
    CreateProductRequest, CreateProductResponse, GetProductsRequest, GetProductsResponse, Product,
    UploadRequest, UploadResponse,
};
use storefront_core::{BusinessError, Reply};
use tracing::debug;

use crate::service::config::DomainConfig;
use crate::service::middleware::LogFields;
use crate::storage::{BlobRecord, SharedStore, Stores};

pub struct ProductService {
    products: SharedStore<Product>,
    blobs: SharedStore<BlobRecord>,
    max_upload_bytes: usize,
}

impl ProductService {
    #[must_use]
    pub fn new(stores: &Stores, config: &DomainConfig) -> Self {
        Self {
            products: stores.products.clone(),
            blobs: stores.blobs.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Sums `a` and `b`. Both zero, or a sum outside `i32`, is a business error.
    ///
    /// # Errors
    ///
    /// Never fails at the collaborator level; the `Result` keeps every
    /// operation on one signature.
    pub fn get_products(&self, req: GetProductsRequest) -> anyhow::Result<Reply<GetProductsResponse>> {
        if req.a == 0 && req.b == 0 {
            return Ok(Reply::fail(BusinessError::TwoZeroes));
        }
        let sum = req
            .a
            .checked_add(req.b)
            .filter(|v| i32::try_from(*v).is_ok());
        Ok(match sum {
            Some(v) => Reply::ok(GetProductsResponse { v }),
            None => Reply::fail(BusinessError::IntOverflow),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn create_product(
        &self,
        req: CreateProductRequest,
    ) -> anyhow::Result<Reply<CreateProductResponse>> {
        let mut product = req.product;
        if product.id.is_empty() {
            product.id = uuid::Uuid::new_v4().to_string();
        }
        let id = product.id.clone();
        self.products.upsert(product)?;
        Ok(Reply::ok(CreateProductResponse { id }))
    }

    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn upload(&self, req: UploadRequest) -> anyhow::Result<Reply<UploadResponse>> {
        if req.body.len() > self.max_upload_bytes {
            return Ok(Reply::fail(BusinessError::MaxSizeExceeded));
        }
        let digest = hex::encode(Sha256::digest(&req.body));
        if !req.checksum.is_empty() && !req.checksum.eq_ignore_ascii_case(&digest) {
            return Ok(Reply::fail(BusinessError::ChecksumMismatch));
        }

        let id = uuid::Uuid::new_v4().to_string();
        debug!(id = %id, name = %req.name, size = req.body.len(), "storing upload");
        self.blobs.upsert(BlobRecord {
            id: id.clone(),
            name: req.name,
            checksum: digest,
            body: req.body,
        })?;
        Ok(Reply::ok(UploadResponse { id }))
    }
}

impl LogFields for GetProductsRequest {
    fn log_fields(&self) -> String {
        format!("a={} b={}", self.a, self.b)
    }
}

impl LogFields for CreateProductRequest {
    fn log_fields(&self) -> String {
        format!("name={}", self.product.name)
    }
}

impl LogFields for UploadRequest {
    fn log_fields(&self) -> String {
        format!("name={} size={}", self.name, self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open, StorageConfig};

    fn service() -> (ProductService, Stores) {
        let stores = open(&StorageConfig::default()).unwrap();
        let config = DomainConfig {
            max_upload_bytes: 16,
            ..DomainConfig::default()
        };
        (ProductService::new(&stores, &config), stores)
    }

    fn sum(a: i64, b: i64) -> Reply<GetProductsResponse> {
        service().0.get_products(GetProductsRequest { a, b }).unwrap()
    }

    #[test]
    fn sums_two_integers() {
        assert_eq!(sum(2, 3).value(), Some(&GetProductsResponse { v: 5 }));
        assert_eq!(sum(0, 7).value(), Some(&GetProductsResponse { v: 7 }));
        assert_eq!(sum(-4, 1).value(), Some(&GetProductsResponse { v: -3 }));
    }

    #[test]
    fn two_zeroes_is_rejected() {
        assert_eq!(sum(0, 0).error(), Some(&BusinessError::TwoZeroes));
    }

    #[test]
    fn sum_must_fit_i32() {
        let max = i64::from(i32::MAX);
        assert!(sum(max, 0).is_ok());
        assert_eq!(sum(max, 1).error(), Some(&BusinessError::IntOverflow));
        assert_eq!(
            sum(i64::from(i32::MIN), -1).error(),
            Some(&BusinessError::IntOverflow)
        );
        assert_eq!(sum(i64::MAX, 1).error(), Some(&BusinessError::IntOverflow));
    }

    #[test]
    fn create_product_assigns_an_id() {
        let (svc, stores) = service();
        let reply = svc
            .create_product(CreateProductRequest {
                product: Product {
                    name: "kettle".to_string(),
                    ..Product::default()
                },
            })
            .unwrap();
        let id = reply.into_result().unwrap().id;
        assert!(!id.is_empty());
        assert_eq!(stores.products.get(&id).unwrap().unwrap().name, "kettle");
    }

    #[test]
    fn create_product_keeps_a_given_id() {
        let (svc, stores) = service();
        for name in ["a", "b"] {
            svc.create_product(CreateProductRequest {
                product: Product {
                    id: "p1".to_string(),
                    name: name.to_string(),
                    ..Product::default()
                },
            })
            .unwrap();
        }
        assert_eq!(stores.products.len(), 1);
        assert_eq!(stores.products.get("p1").unwrap().unwrap().name, "b");
    }

    #[test]
    fn upload_verifies_checksum() {
        let (svc, stores) = service();
        let body = b"png bytes".to_vec();
        let checksum = hex::encode(Sha256::digest(&body));

        let ok = svc
            .upload(UploadRequest {
                name: "a.png".to_string(),
                checksum: checksum.to_uppercase(),
                body: body.clone(),
            })
            .unwrap();
        let id = ok.into_result().unwrap().id;
        assert_eq!(stores.blobs.get(&id).unwrap().unwrap().checksum, checksum);

        let bad = svc
            .upload(UploadRequest {
                name: "a.png".to_string(),
                checksum: "00".repeat(32),
                body,
            })
            .unwrap();
        assert_eq!(bad.error(), Some(&BusinessError::ChecksumMismatch));
        assert_eq!(stores.blobs.len(), 1);
    }

    #[test]
    fn upload_without_checksum_is_accepted() {
        let (svc, _) = service();
        let reply = svc
            .upload(UploadRequest {
                name: "a.txt".to_string(),
                checksum: String::new(),
                body: b"hi".to_vec(),
            })
            .unwrap();
        assert!(reply.is_ok());
    }

    #[test]
    fn upload_enforces_size_limit() {
        let (svc, stores) = service();
        let reply = svc
            .upload(UploadRequest {
                name: "big.bin".to_string(),
                checksum: String::new(),
                body: vec![0; 17],
            })
            .unwrap();
        assert_eq!(reply.error(), Some(&BusinessError::MaxSizeExceeded));
        assert!(stores.blobs.is_empty());
    }
}
