use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Bounded pool of worker tasks. Submitted futures queue behind a semaphore
/// permit, so at most `limit` probe bodies touch the network at once.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        TaskHandle {
            handle: tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                task.await
            }),
        }
    }
}

pub struct TaskHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Best-effort cancellation; never blocks waiting for the task to stop.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub async fn join(self) -> Result<T, JoinError> {
        self.handle.await
    }
}
