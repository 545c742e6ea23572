//! Async runtime abstraction for background bundle reads
//!
//! Storage backends that read asynchronously hand their work to an
//! [`AsyncSpawner`], so the loader works with any async runtime (tokio, a
//! custom executor, or the inline mock used in tests).

pub mod mock;
#[cfg(feature = "runtime-tokio")]
pub mod tokio_impl;

use std::fmt::Debug;
use std::future::Future;

/// Async task spawner trait
///
/// # Example
/// ```ignore
/// let spawner = TokioSpawner::new();
/// spawner.spawn(async {
///     // Read bundle bytes here
/// });
/// ```
pub trait AsyncSpawner: Send + Sync + Clone + Debug {
    /// Spawn a detached task
    ///
    /// Results travel back through whatever channel the task captured.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Get the name of this runtime (for debugging)
    fn runtime_name(&self) -> &'static str;

    /// Block on a future (if supported by the runtime)
    ///
    /// Returns None if blocking is not supported.
    fn block_on<F, T>(&self, _future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        None // Default: blocking not supported
    }
}

// Re-export implementations
pub use mock::{MockSpawnBehavior, MockSpawner};

#[cfg(feature = "runtime-tokio")]
pub use tokio_impl::TokioSpawner;
