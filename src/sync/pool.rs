use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::error::{AppError, AppResult};

/// Why one pooled task did not produce a value
#[derive(Debug)]
pub enum TaskFailure {
    Error(AppError),
    Panic(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Error(e) => write!(f, "{}", e),
            TaskFailure::Panic(msg) => write!(f, "task panicked: {}", msg),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Bounded fan-out for one call site.
///
/// At most `size` tasks run at once. Every task is panic-contained, so a
/// `run_all` always returns one result per input, in input order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub async fn run_all<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Result<R, TaskFailure>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<R>> + Send + 'static,
    {
        let task = Arc::new(task);
        let mut results: Vec<Option<Result<R, TaskFailure>>> =
            std::iter::repeat_with(|| None).take(items.len()).collect();
        let mut set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            // permit is taken before spawning so at most `size` tasks exist
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    results[index] = Some(Err(TaskFailure::Error(AppError::Internal(format!(
                        "{} pool closed",
                        self.name
                    )))));
                    continue;
                }
            };

            let task = task.clone();
            set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(async move { task(item).await })
                    .catch_unwind()
                    .await;
                (index, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(Ok(value)))) => results[index] = Some(Ok(value)),
                Ok((index, Ok(Err(e)))) => results[index] = Some(Err(TaskFailure::Error(e))),
                Ok((index, Err(payload))) => {
                    let msg = panic_message(payload);
                    error!(pool = self.name, index, "task panicked: {}", msg);
                    results[index] = Some(Err(TaskFailure::Panic(msg)));
                }
                Err(e) => error!(pool = self.name, "task did not complete: {:?}", e),
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(TaskFailure::Error(AppError::Internal("task was aborted".to_string())))
                })
            })
            .collect()
    }
}
