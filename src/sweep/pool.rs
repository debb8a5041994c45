// src/sweep/pool.rs — Process-wide pool for CPU-bound work

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::compute::ComputeError;

/// Bounds how many blocking compute calls run at once across the whole
/// process. Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on the blocking thread pool once a slot is free. A panic in
    /// `f` comes back as `ComputeError::Worker`.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ComputeError>
    where
        F: FnOnce() -> Result<T, ComputeError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ComputeError::Worker("worker pool is shut down".into()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| ComputeError::Worker(e.to_string()))?
    }

    /// Refuse new work. Calls already holding a slot finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2);
        let v = pool.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(v, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| Err::<(), _>(ComputeError::Failed("nope".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::Failed(_)));
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| -> Result<(), ComputeError> { panic!("kaboom") })
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::Worker(_)));
        // The slot is returned even after a panic.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        let err = pool.run(|| Ok(())).await.unwrap_err();
        assert!(matches!(err, ComputeError::Worker(_)));
    }

    #[test]
    fn test_zero_size_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
