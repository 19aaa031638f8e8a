//! Fixed-size worker pool over a queue of unit indices.
//!
//! Indices `0..total` are pushed onto a bounded multi-consumer queue that
//! `threads` workers drain. Every index yields exactly one [`Outcome`] on the
//! returned channel, including indices whose job panicked. The channel closes
//! once all workers have exited, so a consumer can drain it to completion.

use crate::error::JobPanic;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Upper bound on the queue and outcome channel depth.
///
/// Both channels are sized to the unit count up to this limit. Beyond it the
/// enqueuer waits for workers instead of allocating more slots.
pub const MAX_QUEUE_DEPTH: usize = 1 << 16;

/// Result of one unit of work.
#[derive(Debug)]
pub struct Outcome<E> {
    pub index: u64,
    pub result: Result<(), E>,
}

impl<E> Outcome<E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn queue_depth(total: u64) -> usize {
    usize::try_from(total)
        .unwrap_or(MAX_QUEUE_DEPTH)
        .clamp(1, MAX_QUEUE_DEPTH)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `job` once for every index in `0..total` on `threads` workers.
///
/// Returns the outcome channel immediately; the pool runs in the background
/// and is torn down once every unit has been processed. At most `threads`
/// jobs are in flight at once. A `threads` of zero is treated as one.
///
/// Must be called from within a tokio runtime.
pub fn run_units<E, F, Fut>(total: u64, threads: usize, job: F) -> mpsc::Receiver<Outcome<E>>
where
    E: From<JobPanic> + Send + 'static,
    F: Fn(u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    let depth = queue_depth(total);
    let (queue_tx, queue_rx) = async_channel::bounded::<u64>(depth);
    let (outcome_tx, outcome_rx) = mpsc::channel::<Outcome<E>>(depth);
    let job = Arc::new(job);

    let workers: Vec<_> = (0..threads.max(1))
        .map(|worker_id| {
            let queue_rx = queue_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let job = job.clone();

            tokio::spawn(async move {
                while let Ok(index) = queue_rx.recv().await {
                    debug!(worker_id, index, "Processing unit");
                    let result = match AssertUnwindSafe(async { job(index).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(worker_id, index, %message, "Unit panicked");
                            Err(E::from(JobPanic { index, message }))
                        }
                    };

                    if outcome_tx.send(Outcome { index, result }).await.is_err() {
                        // Consumer went away; nobody is left to report to.
                        break;
                    }
                }
            })
        })
        .collect();

    // Workers hold their own clones; the pool only keeps the enqueue side.
    drop(queue_rx);

    tokio::spawn(async move {
        for index in 0..total {
            if queue_tx.send(index).await.is_err() {
                break;
            }
        }
        queue_tx.close();

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }

        // Last sender: the outcome channel closes here.
        drop(outcome_tx);
    });

    outcome_rx
}
