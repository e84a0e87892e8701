//! Domain records and per-operation request/response types.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the same types
//! serve the JSON routes and, via `rmp_serde::to_vec_named()`, the binary RPC
//! bodies. Missing fields decode to their defaults; validation belongs to the
//! services, not to the wire.

pub mod order;
pub mod product;
pub mod user;

pub use order::*;
pub use product::*;
pub use user::*;
