//! # Concurrency Limiter
//!
//! A counting semaphore that admits at most `capacity` callers at a time.
//!
//! Blocked callers are queued and admitted strictly in arrival order: every
//! [`ConcurrencyLimiter::release`] hands its permit to the oldest waiter. A
//! queued caller can be cancelled through a [`CancellationToken`] without
//! leaking its claim or stealing a permit that was meant for someone else.
//!
//! The counter and the wait queue live behind a single lock. The counter goes
//! negative while callers are queued, so `-counter` is the number of waiting
//! callers. Withdrawn callers stay in the queue as tombstones until a release
//! or a compaction sweeps them out, so leaving the queue is O(1).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The acquisition was cancelled before a permit was handed over.
    #[error("acquisition cancelled while waiting for a permit")]
    Cancelled,
}

/// Position of a queued caller.
#[derive(Debug)]
enum WaiterState {
    /// Enqueued but not polled yet, so there is nothing to wake.
    Pending,
    /// Enqueued, resumable through the waker.
    Waiting(Waker),
    /// A release handed the permit over; the caller has not observed it yet.
    Admitted,
}

/// How a cancellation resolved against an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelOutcome {
    /// Seen before the caller took anything: nothing to restore.
    BeforeEnqueue,
    /// The caller was still queued: it leaves the queue and its claim is restored.
    Dequeued,
    /// A release already admitted the caller, the cancellation is ignored.
    AlreadyAdmitted,
}

impl CancelOutcome {
    fn into_result(self) -> Result<(), LimiterError> {
        match self {
            Self::AlreadyAdmitted => Ok(()),
            Self::BeforeEnqueue | Self::Dequeued => Err(LimiterError::Cancelled),
        }
    }
}

/// Tombstones tolerated in the queue beyond twice the live waiters.
const COMPACT_SLACK: usize = 64;

#[derive(Debug)]
struct State {
    value: isize,
    next_id: u64,
    /// FIFO: pushed at the back, admitted from the front. Ids without a
    /// `waiters` record are tombstones of withdrawn callers.
    queue: VecDeque<u64>,
    waiters: HashMap<u64, WaiterState>,
    /// Queued callers neither admitted nor withdrawn.
    waiting: usize,
}

impl State {
    fn enqueue(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(id);
        self.waiters.insert(id, WaiterState::Pending);
        self.waiting += 1;
        id
    }

    /// Gives back the claim of a still-queued waiter whose record the caller
    /// already removed. Its queue entry is left behind as a tombstone.
    fn withdraw(&mut self) {
        debug_assert!(self.waiting > 0, "withdraw without a waiting caller");
        self.waiting -= 1;
        self.value += 1;
        self.compact();
    }

    /// Sweeps tombstones once they outnumber the live waiters, keeping the
    /// cost per withdrawal amortized O(1).
    fn compact(&mut self) {
        if self.queue.len() <= 2 * self.waiting + COMPACT_SLACK {
            return;
        }
        let waiters = &self.waiters;
        self.queue.retain(|id| waiters.contains_key(id));
    }

    fn release(&mut self) -> bool {
        self.value += 1;

        while let Some(id) = self.queue.pop_front() {
            let Some(slot) = self.waiters.get_mut(&id) else {
                continue;
            };
            match std::mem::replace(slot, WaiterState::Admitted) {
                WaiterState::Waiting(waker) => waker.wake(),
                WaiterState::Pending => {}
                WaiterState::Admitted => {
                    debug_assert!(false, "queued waiter {id} was already admitted");
                    continue;
                }
            }
            self.waiting -= 1;
            return true;
        }
        false
    }
}

/// Bounded counting semaphore with FIFO fairness and cancellable waits.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    capacity: usize,
    state: Mutex<State>,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                value: capacity as isize,
                next_id: 0,
                queue: VecDeque::new(),
                waiters: HashMap::new(),
                waiting: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits that can be taken right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.lock().value.max(0) as usize
    }

    /// Callers currently suspended in the wait queue.
    pub fn queued(&self) -> usize {
        self.lock().waiting
    }

    /// Takes a permit, waiting in line if none is free.
    pub async fn acquire(&self) {
        let id = {
            let mut state = self.lock();
            state.value -= 1;
            if state.value >= 0 {
                return;
            }
            state.enqueue()
        };
        Acquire::new(self, id).await;
    }

    /// Takes a permit unless `cancel` fires first.
    ///
    /// A token that is already cancelled is refused before the counter is
    /// decremented, so a refused caller never holds a claim and
    /// `counter + admitted == capacity` holds without a compensating release.
    /// Once a release has admitted the caller, a later cancellation no longer
    /// has any effect and the call succeeds.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        let id = {
            let mut state = self.lock();
            if cancel.is_cancelled() {
                return CancelOutcome::BeforeEnqueue.into_result();
            }
            state.value -= 1;
            if state.value >= 0 {
                return Ok(());
            }
            state.enqueue()
        };

        let mut acquire = Acquire::new(self, id);
        tokio::select! {
            biased;
            () = &mut acquire => Ok(()),
            () = cancel.cancelled() => {
                let outcome = acquire.cancel();
                trace!(waiter = id, ?outcome, "Acquisition cancelled");
                outcome.into_result()
            }
        }
    }

    /// [`Self::acquire_cancellable`] returning a guard that releases on drop.
    pub async fn acquire_owned(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Permit, LimiterError> {
        self.acquire_cancellable(cancel).await?;
        Ok(Permit {
            limiter: Arc::clone(self),
        })
    }

    /// Returns a permit. Returns `true` when a queued caller was admitted.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        debug_assert!(
            state.value < self.capacity as isize,
            "release without a matching acquire"
        );
        state.release()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held permit. Dropping it releases the permit on every exit path.
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct Permit {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Suspension of one queued caller until a release admits it.
struct Acquire<'a> {
    limiter: &'a ConcurrencyLimiter,
    id: u64,
    settled: bool,
}

impl<'a> Acquire<'a> {
    fn new(limiter: &'a ConcurrencyLimiter, id: u64) -> Self {
        Self {
            limiter,
            id,
            settled: false,
        }
    }

    fn cancel(&mut self) -> CancelOutcome {
        let mut state = self.limiter.lock();
        self.settled = true;
        match state.waiters.remove(&self.id) {
            Some(WaiterState::Admitted) => CancelOutcome::AlreadyAdmitted,
            Some(WaiterState::Pending | WaiterState::Waiting(_)) => {
                state.withdraw();
                CancelOutcome::Dequeued
            }
            None => {
                debug_assert!(false, "cancelled waiter {} has no record", self.id);
                CancelOutcome::AlreadyAdmitted
            }
        }
    }
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut guard = this.limiter.lock();
        let state = &mut *guard;

        match state.waiters.get_mut(&this.id) {
            Some(WaiterState::Admitted) => {
                state.waiters.remove(&this.id);
                this.settled = true;
                Poll::Ready(())
            }
            Some(slot) => {
                *slot = WaiterState::Waiting(cx.waker().clone());
                Poll::Pending
            }
            None => {
                debug_assert!(this.settled, "waiter {} polled without a record", this.id);
                Poll::Ready(())
            }
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.limiter.lock();
        match state.waiters.remove(&self.id) {
            // Admitted but abandoned before it was observed: pass the permit on.
            Some(WaiterState::Admitted) => {
                state.release();
            }
            Some(WaiterState::Pending | WaiterState::Waiting(_)) => state.withdraw(),
            None => {}
        }
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
