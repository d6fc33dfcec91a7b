//! Workspace umbrella crate.
//!
//! Hosts that embed the pipeline bridge can depend on
//! `pipeline-bridge-workspace` and get the `core-service` façade with the
//! desktop adapters enabled, instead of wiring each crate themselves.

#[cfg(feature = "desktop-shims")]
pub use core_service::{BridgeService, CoreError, HostCommand, HostReply, Result};
