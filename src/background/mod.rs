//! Background tasks: detached work that something still waits on.
//!
//! A [`TaskGroup`] is handed to code that wants to fire and forget (cache
//! writes, `wait_until` work on lifecycle events). The owner of the group
//! keeps the surrounding request or event alive by awaiting [`TaskGroup::wait`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::warn;

/// Error type produced by tasks in a [`TaskGroup`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single task.
pub type TaskResult = Result<(), BoxError>;

/// A cloneable set of spawned tasks.
///
/// Clones share the same set, so a task spawned through any clone is awaited
/// by [`wait`](Self::wait) on any other.
///
/// # Examples
///
/// ```
/// use cachefront::background::TaskGroup;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group = TaskGroup::new();
/// group.spawn(async { Ok(()) });
/// assert!(group.wait().await.is_ok());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct TaskGroup {
    handles: Arc<Mutex<Vec<JoinHandle<TaskResult>>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` onto the runtime and tracks it in this group.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Number of tasks spawned and not yet collected by [`wait`](Self::wait).
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits until every task in the group, including tasks spawned while
    /// waiting, has finished.
    ///
    /// All tasks always run to completion. The first failure (or panic) is
    /// returned; later ones are logged.
    pub async fn wait(&self) -> TaskResult {
        let mut first_error: Option<BoxError> = None;

        loop {
            let batch = std::mem::take(
                &mut *self
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }

            for handle in batch {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_error) => Err(Box::new(join_error) as BoxError),
                };
                if let Err(e) = result {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        warn!(error = %e, "additional background task failed");
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn wait_on_empty_group_succeeds() {
        assert!(TaskGroup::new().wait().await.is_ok());
    }

    #[tokio::test]
    async fn wait_covers_tasks_spawned_by_tasks() {
        let group = TaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_group = group.clone();
        let inner_counter = Arc::clone(&counter);
        group.spawn(async move {
            let c = Arc::clone(&inner_counter);
            inner_group.spawn(async move {
                tokio::task::yield_now().await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        group.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(group.pending(), 0);
    }

    #[tokio::test]
    async fn first_failure_is_reported_after_all_finish() {
        let group = TaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));

        group.spawn(async { Err("seed failed".into()) });
        let f = Arc::clone(&finished);
        group.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "seed failed");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
