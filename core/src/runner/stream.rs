use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

use super::{BoundedWorkRunner, ItemFailure};

/// One finished item, tagged with its input position.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed<R> {
    pub index: usize,
    pub value: R,
}

/// Results of a streaming run, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome<R> {
    pub completed: Vec<Completed<R>>,
    /// Scheduling steps skipped because memory was above the warning fraction.
    pub pressure_pauses: u32,
    /// Items admitted despite pressure after too many consecutive pauses.
    pub forced_admissions: u32,
}

impl<R> StreamOutcome<R> {
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Input indices in the order items finished.
    pub fn completion_order(&self) -> Vec<usize> {
        self.completed.iter().map(|c| c.index).collect()
    }

    /// Values in completion order.
    pub fn into_values(self) -> Vec<R> {
        self.completed.into_iter().map(|c| c.value).collect()
    }

    /// Values re-sorted to line up with the input.
    pub fn into_input_order(mut self) -> Vec<R> {
        self.completed.sort_by_key(|c| c.index);
        self.into_values()
    }
}

impl BoundedWorkRunner {
    /// [`stream_with`](Self::stream_with) using the configured concurrency.
    pub async fn stream<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
    ) -> Result<StreamOutcome<R>, ItemFailure<E>>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.stream_with(items, self.options.stream_concurrency, processor)
            .await
    }

    /// Keep up to `concurrency` items in flight, admitting more only while
    /// memory stays at or below the warning fraction.
    ///
    /// Under pressure the governor is asked to reclaim, and the step waits for
    /// an in-flight item to finish (or, with nothing in flight, sleeps). After
    /// `stream_max_pressure_pauses` consecutive idle pauses one item is
    /// admitted anyway so the run cannot stall forever.
    pub async fn stream_with<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        concurrency: usize,
        mut processor: F,
    ) -> Result<StreamOutcome<R>, ItemFailure<E>>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let concurrency = concurrency.max(1);
        let mut queue = items.into_iter().enumerate().peekable();
        let mut in_flight = FuturesUnordered::new();
        let mut outcome = StreamOutcome {
            completed: Vec::new(),
            pressure_pauses: 0,
            forced_admissions: 0,
        };
        let mut idle_pauses = 0u32;

        while queue.peek().is_some() || !in_flight.is_empty() {
            let mut admit = concurrency;

            if queue.peek().is_some() && self.memory.over_warning() {
                outcome.pressure_pauses += 1;
                tracing::debug!(in_flight = in_flight.len(), "memory high, pausing admission");
                self.memory.reclaim().await;

                if in_flight.is_empty() {
                    if idle_pauses < self.options.stream_max_pressure_pauses {
                        idle_pauses += 1;
                        tokio::time::sleep(self.options.stream_pressure_pause).await;
                        continue;
                    }
                    tracing::warn!(
                        pauses = idle_pauses,
                        "memory still high, admitting one item to keep making progress"
                    );
                    outcome.forced_admissions += 1;
                    idle_pauses = 0;
                    admit = 1;
                } else {
                    admit = 0;
                }
            } else {
                idle_pauses = 0;
            }

            while in_flight.len() < admit {
                let Some((index, item)) = queue.next() else {
                    break;
                };
                let fut = processor(item);
                in_flight.push(async move { (index, fut.await) });
            }

            if let Some((index, result)) = in_flight.next().await {
                match result {
                    Ok(value) => outcome.completed.push(Completed { index, value }),
                    Err(error) => {
                        tracing::debug!(index, cancelled = in_flight.len(), "stream item failed");
                        return Err(ItemFailure {
                            index,
                            error,
                            completed: outcome.completed.len(),
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }
}
