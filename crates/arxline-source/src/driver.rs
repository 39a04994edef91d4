//! Concurrency driver: run the per-paper pipeline across a worker pool

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use arxline_arxiv::PaperId;
use arxline_core::{Counter, WorkQueue, is_shutdown_requested};
use indicatif::ProgressBar;

use crate::fetcher::VersionSource;
use crate::orchestrator::{PaperOutcome, PaperPipeline};

/// Aggregate counts over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunCounts {
    fn record(&mut self, outcome: PaperOutcome) {
        self.total += 1;
        match outcome {
            PaperOutcome::Success => self.succeeded += 1,
            PaperOutcome::Skipped => self.skipped += 1,
            PaperOutcome::Failed => self.failed += 1,
        }
    }
}

/// Counts plus every per-paper outcome, in completion order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub counts: RunCounts,
    pub outcomes: Vec<(PaperId, PaperOutcome)>,
    /// Papers never started because shutdown was requested
    pub abandoned: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "Source stage: {} processed ({} ok, {} skipped, {} failed) [{:.1}s]",
            self.counts.total,
            self.counts.succeeded,
            self.counts.skipped,
            self.counts.failed,
            self.elapsed.as_secs_f64(),
        );
        if self.abandoned > 0 {
            log::warn!("Source stage: {} papers not started (shutdown)", self.abandoned);
        }
    }
}

/// Process every id on a pool of `pipeline.config.workers` threads.
///
/// Workers claim ids from a shared queue until it is empty or shutdown is
/// requested. A panic inside one paper is caught and counted as failed.
pub fn run_all<S: VersionSource + ?Sized>(
    pipeline: &PaperPipeline<'_, S>,
    ids: &[PaperId],
    pb: &ProgressBar,
) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let workers = pipeline.config.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("source-{i}"))
        .build()
        .context("Failed to create thread pool")?;

    log::info!(
        "Downloading and processing {} papers using {workers} workers",
        ids.len()
    );
    let queue = WorkQueue::new(ids.to_vec());
    let summary = Mutex::new(RunSummary::default());

    pool.scope(|s| {
        for _ in 0..workers {
            s.spawn(|_| {
                while !is_shutdown_requested() {
                    let Some(id) = queue.next() else { break };
                    pb.set_message(id.to_string());
                    let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.process(id)))
                        .unwrap_or_else(|_| {
                            log::error!("{id}: panicked during processing");
                            PaperOutcome::Failed
                        });

                    let telemetry = &pipeline.telemetry;
                    telemetry.incr(Counter::TotalPapers);
                    telemetry.incr(match outcome {
                        PaperOutcome::Success => Counter::SuccessfulPapers,
                        PaperOutcome::Skipped => Counter::SkippedPapers,
                        PaperOutcome::Failed => Counter::FailedPapers,
                    });

                    let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
                    summary.counts.record(outcome);
                    summary.outcomes.push((id.clone(), outcome));
                    drop(summary);
                    pb.inc(1);
                }
            });
        }
    });

    let mut summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
    summary.abandoned = queue.remaining();
    summary.elapsed = start.elapsed();
    Ok(summary)
}
