//! Fail-complete outcome aggregation.

use crate::pool::Outcome;
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::error;

/// Counts of units seen by the aggregator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Drain every outcome and return the first failure, or the counts.
///
/// The channel is always consumed until it closes, so no producer is left
/// blocked and every unit runs to completion even after a failure. Each
/// failure is logged.
pub async fn aggregate<E: Display>(rx: mpsc::Receiver<Outcome<E>>) -> Result<AggregateReport, E> {
    drain(rx, true).await
}

pub(crate) async fn drain<E: Display>(
    mut rx: mpsc::Receiver<Outcome<E>>,
    log_failures: bool,
) -> Result<AggregateReport, E> {
    let mut report = AggregateReport::default();
    let mut first_error: Option<E> = None;

    while let Some(outcome) = rx.recv().await {
        report.total += 1;
        match outcome.result {
            Ok(()) => report.succeeded += 1,
            Err(err) => {
                report.failed += 1;
                if log_failures {
                    error!(index = outcome.index, error = %err, "Unit failed");
                }
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
