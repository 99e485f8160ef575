//! # crew-rpc
//!
//! JSON-RPC 2.0 plumbing for the persistent backend connection.
//!
//! The backend is a language-server-like process: requests and
//! notifications flow both ways over one byte stream, framed with
//! `Content-Length` headers. This crate provides:
//!
//! - **Wire types**: request / response / notification structs
//! - **Codec**: the framing [`codec::JsonRpcCodec`]
//! - **Client**: [`client::RpcClient`] with a pending-request map,
//!   per-token progress routing, and client-tool dispatch
//! - **Pool**: [`pool::ClientPool`] bounding concurrent clients
//! - **Progress adapter**: typed `$/progress` payloads and their
//!   mapping to [`crew_core::AgentEvent`]

#![deny(unsafe_code)]

pub mod client;
pub mod codec;
pub mod errors;
pub mod methods;
pub mod params;
pub mod pool;
pub mod progress;
pub mod types;

pub use client::{ClientToolHandler, NullToolHandler, RpcClient};
pub use errors::RpcError;
pub use pool::{ClientPool, Connector, PooledClient};
pub use progress::{ProgressParams, ProgressPayload, ProgressValue};
