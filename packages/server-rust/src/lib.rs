//! Storefront server: the public gateway, the three domain service nodes,
//! service discovery, and resilient RPC dispatch between them.
//!
//! A request enters [`gateway`] over HTTP, is turned into a typed operation
//! call, and leaves through a per-operation dispatcher (retry, breaker and
//! round-robin over the instances the registry reports) as an RPC frame.
//! A [`node`] decodes the frame and runs the same operation through its
//! local middleware chain.

pub mod cli;
pub mod discovery;
pub mod gateway;
pub mod network;
pub mod node;
pub mod resilience;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;
