//! # Query Execution
//!
//! The single-threaded query path is the pull iterator in [`crate::api`];
//! this module adds the bounded [`TaskQueue`] and, behind the
//! `multithreaded` cargo feature, a worker-pool executor for scalar
//! reducers: the tile walker stays on the calling thread and feeds tile
//! references through the queue, workers scan tiles concurrently.
//!
//! User predicates run on worker threads here, which is why filters are
//! `Send + Sync` and predicates must be re-entrant.

mod task_queue;

pub use task_queue::{TaskContext, TaskQueue};

#[cfg(feature = "multithreaded")]
pub(crate) mod parallel {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use eyre::Result;
    use parking_lot::Mutex;

    use super::{TaskContext, TaskQueue};
    use crate::api::Features;
    use crate::index::{TileRef, TileWalker};

    struct CountCtx<'a> {
        features: &'a Features,
        total: AtomicUsize,
        failure: Mutex<Option<eyre::Report>>,
    }

    impl TaskContext<TileRef> for CountCtx<'_> {
        fn process_task(&self, tile: TileRef) {
            if self.failure.lock().is_some() {
                return;
            }
            match self.features.count_in_tile(tile) {
                Ok(n) => {
                    self.total.fetch_add(n, Ordering::Relaxed);
                }
                Err(e) => {
                    let mut failure = self.failure.lock();
                    if failure.is_none() {
                        *failure = Some(e);
                    }
                }
            }
        }
    }

    /// Counts matching features with a worker pool; the walk itself stays
    /// on the calling thread.
    pub(crate) fn count(features: &Features) -> Result<usize> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let queue = TaskQueue::new((workers * 2).max(4));
        let ctx = CountCtx {
            features,
            total: AtomicUsize::new(0),
            failure: Mutex::new(None),
        };

        let mut walker = TileWalker::new(features.store_handle(), features.query_bounds())?;
        let mut walk_error = None;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| queue.process(&ctx));
            }

            while let Some(next) = walker.next() {
                match next {
                    Ok(tile) => queue.submit(tile),
                    Err(e) => {
                        walk_error = Some(e);
                        break;
                    }
                }
            }
            queue.await_completion();
            queue.shutdown();
        });

        if let Some(e) = walk_error {
            return Err(e);
        }
        if let Some(e) = ctx.failure.into_inner() {
            return Err(e);
        }
        Ok(ctx.total.into_inner())
    }
}
