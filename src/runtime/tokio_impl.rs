//! Tokio async runtime implementation
//!
//! Bundle reads spawned here run on the ambient Tokio runtime's worker
//! threads; the loader still only observes them from its own thread.

use super::AsyncSpawner;
use std::future::Future;
use tokio::runtime::RuntimeFlavor;

/// Tokio-based async spawner
#[derive(Clone, Debug, Default, Copy)]
pub struct TokioSpawner;

impl TokioSpawner {
    /// Create a new Tokio spawner
    pub fn new() -> Self {
        Self
    }
}

impl AsyncSpawner for TokioSpawner {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => {
                // No runtime on this thread: run the read on a helper thread
                // with its own single-threaded runtime.
                std::thread::spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(task),
                        Err(err) => log::error!("Failed to start Tokio runtime: {err}"),
                    }
                });
            }
        }
    }

    fn runtime_name(&self) -> &'static str {
        "Tokio"
    }

    fn block_on<F, T>(&self, future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        match tokio::runtime::Handle::try_current() {
            // Already inside a runtime: step out of the async context first
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Some(tokio::task::block_in_place(|| handle.block_on(future)))
            }
            // A current-thread runtime cannot give up its only worker
            Ok(_) => None,
            Err(_) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .ok()?;
                Some(rt.block_on(future))
            }
        }
    }
}
