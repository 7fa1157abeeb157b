//! # Probe Orchestrator
//!
//! Fans a target list out into one task per target and reduces the outcome.
//!
//! Each task:
//! 1. waits for a permit of the shared [`ConcurrencyLimiter`] (cancellable),
//! 2. runs one [`ProbeSession`] to completion,
//! 3. releases the permit on every exit path,
//! 4. counts itself as done, whether it produced a result or not.
//!
//! Results come back in completion order; sorting is the caller's business.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rangeping_common::network::probe::{ProbeResult, Progress};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::echo::EchoEngineProvider;
use crate::limiter::ConcurrencyLimiter;
use crate::session::ProbeSession;

pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// Completion counter of the current run.
///
/// The observer is invoked while the counter is locked, so observers see the
/// updates in order and never a stale value after a newer one.
struct ProgressTracker {
    state: Mutex<Progress>,
    observer: Option<ProgressObserver>,
}

impl ProgressTracker {
    fn new(observer: Option<ProgressObserver>) -> Self {
        Self {
            state: Mutex::new(Progress::default()),
            observer,
        }
    }

    fn begin(&self, total: usize) {
        let mut progress = self.lock();
        *progress = Progress::new(total);
        self.publish(&progress);
    }

    fn snapshot(&self) -> Progress {
        *self.lock()
    }

    fn complete_one(&self) {
        let mut progress = self.lock();
        progress.completed += 1;
        debug_assert!(progress.completed <= progress.total, "more completions than units");
        self.publish(&progress);
    }

    fn publish(&self, progress: &Progress) {
        if let Some(observer) = &self.observer {
            observer(*progress);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts its unit as completed when dropped, including on panic.
struct CompletionGuard(Arc<ProgressTracker>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.complete_one();
    }
}

pub struct ProbeOrchestrator<P> {
    limiter: Arc<ConcurrencyLimiter>,
    provider: Arc<P>,
    echo_limit: u64,
    cancel: CancellationToken,
    progress: Arc<ProgressTracker>,
}

impl<P: EchoEngineProvider> ProbeOrchestrator<P> {
    pub fn new(limiter: Arc<ConcurrencyLimiter>, provider: P, echo_limit: u64) -> Self {
        Self {
            limiter,
            provider: Arc::new(provider),
            echo_limit,
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressTracker::new(None)),
        }
    }

    /// Registers a callback receiving every progress update of a run.
    pub fn with_progress_observer(
        mut self,
        observer: impl Fn(Progress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Arc::new(ProgressTracker::new(Some(Arc::new(observer))));
        self
    }

    /// Completed share of the current run, or of the last one once it has
    /// finished. `1.0` before any run.
    pub fn progress(&self) -> f64 {
        self.progress.snapshot().fraction()
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Token that cancels every unit still waiting for a permit.
    ///
    /// Sessions already running are left to finish. Cancellation is final: the
    /// token is never reset, so every later [`Self::run`] on this orchestrator
    /// skips all of its targets. Build a new orchestrator to probe again.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels the current run and every later one. See
    /// [`Self::cancellation_token`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Probes every target and returns the results that were produced.
    ///
    /// Runs may be repeated until the orchestrator is cancelled. One run at a
    /// time: overlapping runs on the same orchestrator would share one
    /// progress counter.
    ///
    /// Targets whose engine could not be set up, and targets whose unit was
    /// cancelled before it got a permit, are absent from the output.
    pub async fn run(&self, targets: Vec<String>) -> Vec<ProbeResult> {
        let total = targets.len();
        self.progress.begin(total);
        if self.cancel.is_cancelled() {
            debug!("Orchestrator already cancelled, {total} targets will be skipped");
        }
        info!(
            "Probing {total} targets, at most {} at a time",
            self.limiter.capacity()
        );

        let mut units: JoinSet<Option<ProbeResult>> = JoinSet::new();
        for target in targets {
            let done = CompletionGuard(Arc::clone(&self.progress));
            let limiter = Arc::clone(&self.limiter);
            let provider = Arc::clone(&self.provider);
            let cancel = self.cancel.clone();
            let echo_limit = self.echo_limit;

            units.spawn(async move {
                let _done = done;
                let Ok(_permit) = limiter.acquire_owned(&cancel).await else {
                    trace!("Skipping {target}: cancelled while waiting");
                    return None;
                };
                let engine = provider.engine(&target);
                ProbeSession::new(target, echo_limit, engine).run().await
            });
        }

        let mut results: Vec<ProbeResult> = Vec::with_capacity(total);
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("Probe unit failed: {e}"),
            }
        }

        info!("{} of {total} targets produced a result", results.len());
        results
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
