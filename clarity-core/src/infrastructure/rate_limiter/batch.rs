//! Bounded-concurrency batch execution sharing one rate-limit budget

use super::service::RateLimiterService;
use super::types::RateLimitConfig;
use crate::application::errors::ExecuteError;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One unit of work in a batch
pub struct BatchItem<F> {
    pub id: String,
    pub operation: F,
}

impl<F> BatchItem<F> {
    pub fn new(id: impl Into<String>, operation: F) -> Self {
        Self {
            id: id.into(),
            operation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Maximum operations in flight at once
    pub concurrency: usize,
    /// Attempt budget handed to each item's `execute_with_rate_limit`
    pub max_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
        }
    }
}

pub type BatchResults<T, E> = HashMap<String, Result<T, ExecuteError<E>>>;

impl RateLimiterService {
    /// Execute `items` under one shared rate limit, at most
    /// `options.concurrency` at a time.
    ///
    /// The returned map holds exactly one entry per distinct item id. Once
    /// `cancel` fires no further item starts and the rest report
    /// [`ExecuteError::Cancelled`]; items already running finish normally.
    /// A panicking operation is reported as [`ExecuteError::TaskFailed`].
    pub async fn batch_execute<T, E, F, Fut>(
        self: &Arc<Self>,
        items: Vec<BatchItem<F>>,
        config: &RateLimitConfig,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> BatchResults<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let concurrency = options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut results: BatchResults<T, E> = HashMap::with_capacity(items.len());
        let mut started: HashSet<String> = HashSet::with_capacity(items.len());
        let mut join_set = JoinSet::new();

        info!(
            identifier = %config.identifier(),
            items = items.len(),
            concurrency,
            "Starting rate-limited batch"
        );

        for item in items {
            if started.contains(&item.id) || results.contains_key(&item.id) {
                warn!(id = %item.id, "Duplicate batch item id, skipping");
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                debug!(id = %item.id, "Batch cancelled before item started");
                results.insert(
                    item.id.clone(),
                    Err(ExecuteError::Cancelled { id: item.id }),
                );
                continue;
            };

            started.insert(item.id.clone());
            let service = Arc::clone(self);
            let config = config.clone();
            let max_retries = options.max_retries;

            join_set.spawn(async move {
                let _permit = permit;
                let BatchItem { id, operation } = item;
                let outcome = AssertUnwindSafe(service.execute_with_rate_limit(
                    &config,
                    max_retries,
                    operation,
                ))
                .catch_unwind()
                .await;

                let result = outcome.unwrap_or_else(|panic| {
                    Err(ExecuteError::TaskFailed {
                        id: id.clone(),
                        message: panic_message(panic.as_ref()),
                    })
                });
                (id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(ExecuteError::TaskFailed { message, .. }) = &result {
                        error!(id = %id, message = %message, "Batch item panicked");
                    }
                    started.remove(&id);
                    results.insert(id, result);
                }
                Err(join_error) => {
                    error!(error = %join_error, "Batch task did not complete");
                }
            }
        }

        // Tasks lost to a runtime abort still get an entry
        for id in started {
            results.insert(
                id.clone(),
                Err(ExecuteError::TaskFailed {
                    id,
                    message: "task aborted".to_string(),
                }),
            );
        }

        results
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
