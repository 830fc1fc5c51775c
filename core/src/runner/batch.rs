use std::future::Future;

use futures::future::try_join_all;
use futures::TryFutureExt;

use super::{BoundedWorkRunner, ItemFailure};

impl BoundedWorkRunner {
    /// [`batch_with`](Self::batch_with) using the configured batch size.
    pub async fn batch<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
    ) -> Result<Vec<R>, ItemFailure<E>>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.batch_with(items, self.options.batch_size, processor)
            .await
    }

    /// Process `items` in chunks of `batch_size`, each chunk concurrently.
    ///
    /// Results line up index for index with the input. Memory pressure delays
    /// a chunk but never blocks it: after one reclaim and pause the chunk runs
    /// regardless.
    pub async fn batch_with<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        batch_size: usize,
        mut processor: F,
    ) -> Result<Vec<R>, ItemFailure<E>>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let batch_size = batch_size.max(1);
        let total = items.len();
        let batches = total.div_ceil(batch_size);
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().enumerate().peekable();
        let mut batch_no = 0;

        while items.peek().is_some() {
            batch_no += 1;
            if !self.memory.can_admit(self.options.estimated_batch_mb) {
                tracing::info!(batch = batch_no, "pausing batch for memory reclaim");
                self.memory.reclaim().await;
                tokio::time::sleep(self.options.batch_pressure_pause).await;
            }

            tracing::debug!(batch = batch_no, batches, "processing batch");
            let chunk = items.by_ref().take(batch_size).map(|(index, item)| {
                processor(item).map_err(move |error| (index, error))
            });
            let done = results.len();
            let outputs = try_join_all(chunk)
                .await
                .map_err(|(index, error)| ItemFailure {
                    index,
                    error,
                    completed: done,
                })?;
            results.extend(outputs);

            if items.peek().is_some() {
                self.memory.reclaim().await;
                tokio::time::sleep(self.options.batch_delay).await;
            }
        }

        Ok(results)
    }
}
