use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::HarvestError;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub batches: usize,
    pub items: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the run was cancelled.
    pub not_started: usize,
    pub listing_errors: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct DispatchOutcome<R> {
    pub summary: DispatchSummary,
    pub reports: Vec<R>,
}

/// Fixed-size worker pool that drains one batch at a time.
///
/// Every batch is a barrier: the next batch is not dispatched until all
/// workers are idle, and a cooldown is slept before each batch after the
/// first. Cancellation is cooperative and only stops work that has not
/// started yet.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    cooldown: Duration,
    cancel: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(workers: usize, cooldown: Duration) -> Self {
        Self {
            workers: workers.max(1),
            cooldown,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Shared flag; setting it stops the run before the next item.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs `job` over every item, returning one slot per item in input
    /// order. A slot is `None` when cancellation prevented the item from
    /// starting. Panics are contained to the item that raised them.
    pub fn run_batch<T, R, F>(&self, items: &[T], job: F) -> Vec<Option<Result<R, HarvestError>>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, HarvestError> + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let next = AtomicUsize::new(0);
        let slots = items
            .iter()
            .map(|_| Mutex::new(None))
            .collect::<Vec<Mutex<Option<Result<R, HarvestError>>>>>();
        let workers = self.workers.min(items.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.is_cancelled() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(item) = items.get(index) else {
                            break;
                        };
                        let result = panic::catch_unwind(AssertUnwindSafe(|| job(item)))
                            .unwrap_or_else(|_| {
                                Err(HarvestError::WorkerPanic(format!("batch item {index}")))
                            });
                        let mut slot = slots[index]
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        *slot = Some(result);
                    }
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| slot.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect()
    }

    /// Drives `job` over a lazy sequence of batches.
    pub fn run<I, T, R, F>(&self, batches: I, job: F) -> DispatchOutcome<R>
    where
        I: IntoIterator<Item = Result<Vec<T>, HarvestError>>,
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, HarvestError> + Sync,
    {
        let mut summary = DispatchSummary::default();
        let mut reports = Vec::new();

        for batch in batches {
            if self.is_cancelled() {
                break;
            }
            let items = match batch {
                Ok(items) => items,
                Err(err) => {
                    error!(error = %err, "listing failed");
                    summary.listing_errors += 1;
                    continue;
                }
            };

            if summary.batches > 0 && !self.cooldown.is_zero() {
                thread::sleep(self.cooldown);
                if self.is_cancelled() {
                    summary.not_started += items.len();
                    break;
                }
            }

            summary.batches += 1;
            summary.items += items.len();
            let start = Instant::now();
            info!(
                batch = summary.batches,
                items = items.len(),
                workers = self.workers.min(items.len()),
                "dispatching batch"
            );

            for slot in self.run_batch(&items, &job) {
                match slot {
                    Some(Ok(report)) => {
                        summary.succeeded += 1;
                        reports.push(report);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "item failed");
                        summary.failed += 1;
                    }
                    None => summary.not_started += 1,
                }
            }
            info!(
                batch = summary.batches,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "batch complete"
            );
        }

        summary.cancelled = self.is_cancelled();
        DispatchOutcome { summary, reports }
    }
}
