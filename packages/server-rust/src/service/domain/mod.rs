//! Business logic of the three domain services.
//!
//! Each service is a plain struct over its stores. Methods are synchronous,
//! return `anyhow::Result<Reply<Resp>>`, and report business failures inside
//! the reply. The operation chains in [`crate::service::api`] adapt them to
//! the uniform operation contract.

pub mod order;
pub mod product;
pub mod user;

pub use order::OrderService;
pub use product::ProductService;
pub use user::{Claims, UserService};
