//! Async runtime facade for the pipeline bridge.
//!
//! Every `core-*`, `bridge-*` and `provider-*` crate goes through this crate
//! instead of naming Tokio directly. Keeping the runtime behind one facade
//! means the sync engine, the worker pool and the coordinator all share the
//! same primitives and the same test entry point.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleep, timeout, instants and wall-clock helpers
//! - `sync`: locks, channels, semaphores and cancellation tokens
//! - `fs`: async filesystem access used by the desktop bridge
//! - `runtime`: blocking entry point used by the test and main macros
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub use core_async_macros::{main, test};

pub mod fs;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};

/// Future combinators used for fan-out inside a dependency tier.
pub mod future {
    pub use futures::future::{join_all, BoxFuture, FutureExt};
}
