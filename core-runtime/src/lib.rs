//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the pipeline bridge crates:
//! - Logging and tracing setup
//! - Configuration with capability validation
//! - Event bus for sync pass and asset lifecycle events
//!
//! ## Overview
//!
//! Nothing here knows about identity keys or sync plans. `core-sync` emits
//! [`events::CoreEvent`]s on the bus, `core-service` owns the [`config::CoreConfig`],
//! and the host subscribes to events to drive its notifications panel.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
