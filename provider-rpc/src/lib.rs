//! # JSON-RPC Pipeline Provider
//!
//! Implements [`PipelineApi`](bridge_traits::pipeline::PipelineApi) against a
//! production-pipeline server speaking JSON-RPC 2.0 over HTTP.
//!
//! ## Overview
//!
//! - One POST per call, envelope `{jsonrpc, method, params, id}`
//! - 429/5xx responses and transient transport errors retry with backoff
//! - Server error `-32010` becomes `BridgeError::Conflict` so a racing
//!   publish surfaces as a version conflict
//! - Representation content is uploaded before the representation is
//!   registered

pub mod connector;
pub mod error;
pub mod types;

pub use connector::RpcPipelineClient;
pub use error::{Result, RpcError};
