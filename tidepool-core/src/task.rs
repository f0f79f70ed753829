//! Task spawning abstraction for single-threaded environments.

use async_trait::async_trait;
use std::future::Future;

/// Provider for spawning local tasks in single-threaded context.
///
/// This trait abstracts task spawning so the engine's background work
/// (connection serve loops, the expiry sweeper) stays on the reactor
/// thread regardless of how the host schedules it.
#[async_trait(?Send)]
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    ///
    /// The task must be executed on the spawning thread to maintain
    /// the single-threaded execution guarantees the engine relies on.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;

    /// Yield control to allow other tasks to run.
    async fn yield_now(&self);
}

/// Tokio-based task provider using spawn_local for single-threaded execution.
///
/// Tasks run on the current thread via `tokio::task::spawn_local`, so a
/// [`tokio::task::LocalSet`] must be driving the caller.
#[derive(Clone, Debug)]
pub struct TokioTaskProvider;

#[async_trait(?Send)]
impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("Task {} starting", task_name);
            future.await;
            tracing::trace!("Task {} completed", task_name);
        })
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
