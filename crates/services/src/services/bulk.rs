use std::future::Future;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;

/// Knobs for a bulk run.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Worker count; 0 auto-detects from the CPU count.
    pub jobs: usize,
    /// Capacity of the feed channel in parallel mode.
    pub batch_size: usize,
    /// Keep going after a failure instead of stopping the run.
    pub continue_on_error: bool,
    /// Force sequential execution in input order.
    pub ordered: bool,
    /// Draw a progress bar on stderr (hidden automatically off-TTY).
    pub show_progress: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            batch_size: 16,
            continue_on_error: false,
            ordered: false,
            show_progress: false,
        }
    }
}

#[derive(Debug)]
pub struct BulkFailure {
    pub item: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    /// CLI mapping: 0 when everything succeeded, 1 when nothing did,
    /// 5 for a partial run.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else if self.succeeded == 0 {
            1
        } else {
            5
        }
    }
}

/// Run `op` over `items`. `ordered` (or a single job) executes
/// sequentially in input order; otherwise an unordered worker pool
/// drains a bounded channel. With `continue_on_error` off, sequential
/// mode stops at the first failure and parallel mode raises a stop flag
/// that workers check between items; in-flight items finish, nothing
/// new starts, and the channel is always fully closed so shutdown
/// cannot deadlock.
pub async fn run<F, Fut>(items: Vec<String>, options: &BulkOptions, op: F) -> BulkOutcome
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return BulkOutcome::default();
    }

    let jobs = if options.jobs == 0 {
        num_cpus::get()
    } else {
        options.jobs
    };
    let progress = make_progress(options.show_progress, total as u64);

    let outcome = if options.ordered || jobs <= 1 {
        run_sequential(items, options, op, &progress).await
    } else {
        run_parallel(items, jobs, options, op, &progress).await
    };
    progress.finish_and_clear();
    outcome
}

async fn run_sequential<F, Fut>(
    items: Vec<String>,
    options: &BulkOptions,
    op: F,
    progress: &ProgressBar,
) -> BulkOutcome
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut outcome = BulkOutcome {
        total: items.len(),
        ..Default::default()
    };
    for item in items {
        let result = op(item.clone()).await;
        progress.inc(1);
        match result {
            Ok(()) => outcome.succeeded += 1,
            Err(error) => {
                outcome.failed += 1;
                outcome.failures.push(BulkFailure { item, error });
                if !options.continue_on_error {
                    break;
                }
            }
        }
    }
    outcome
}

async fn run_parallel<F, Fut>(
    items: Vec<String>,
    jobs: usize,
    options: &BulkOptions,
    op: F,
    progress: &ProgressBar,
) -> BulkOutcome
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let total = items.len();
    let continue_on_error = options.continue_on_error;
    let (job_tx, job_rx) = async_channel::bounded::<String>(options.batch_size.max(1));

    let stop = Arc::new(AtomicBool::new(false));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let failures: Arc<Mutex<Vec<BulkFailure>>> = Arc::new(Mutex::new(Vec::new()));

    let mut workers = JoinSet::new();
    for _ in 0..jobs.min(total) {
        let jobs_rx = job_rx.clone();
        let op = op.clone();
        let stop = stop.clone();
        let succeeded = succeeded.clone();
        let failed = failed.clone();
        let failures = failures.clone();
        let progress = progress.clone();
        workers.spawn(async move {
            while let Ok(item) = jobs_rx.recv().await {
                if !continue_on_error && stop.load(Ordering::SeqCst) {
                    break;
                }
                let result = op(item.clone()).await;
                progress.inc(1);
                match result {
                    Ok(()) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(error) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(BulkFailure { item, error });
                        if !continue_on_error {
                            stop.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
        });
    }
    drop(job_rx);

    for item in items {
        if !continue_on_error && stop.load(Ordering::SeqCst) {
            break;
        }
        // Send fails once every worker has exited; nothing left to feed.
        if job_tx.send(item).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    while workers.join_next().await.is_some() {}

    let failures = {
        let mut guard = failures.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    };
    BulkOutcome {
        total,
        succeeded: succeeded.load(Ordering::SeqCst),
        failed: failed.load(Ordering::SeqCst),
        failures,
    }
}

fn make_progress(show: bool, len: u64) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let all_ok = BulkOutcome {
            total: 3,
            succeeded: 3,
            ..Default::default()
        };
        assert_eq!(all_ok.exit_code(), 0);

        let partial = BulkOutcome {
            total: 3,
            succeeded: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(partial.exit_code(), 5);

        let all_failed = BulkOutcome {
            total: 3,
            succeeded: 0,
            failed: 3,
            ..Default::default()
        };
        assert_eq!(all_failed.exit_code(), 1);

        assert_eq!(BulkOutcome::default().exit_code(), 0);
    }
}
