//! Resizable counting gate bounding the number of in-flight fetches.
//!
//! [`ConcurrencyGate`] behaves like a semaphore whose permit count can change
//! while permits are outstanding:
//!
//! - growing the bound immediately hands the new permits to queued callers
//! - shrinking the bound never revokes granted permits; it only holds back
//!   future acquisitions until enough permits have been returned
//!
//! Waiters are served strictly in FIFO order through an explicit queue of
//! one-shot resume handles.
//!
//! # Example
//!
//! ```
//! use blobfetch_core::fetch::ConcurrencyGate;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = ConcurrencyGate::new(2)?;
//! let value = gate.acquire_and_run(|| async { 40 + 2 }).await;
//! assert_eq!(value, 42);
//!
//! gate.resize(4)?;
//! assert_eq!(gate.bound(), 4);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, instrument};

use super::EngineError;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// A counting admission gate with a runtime-adjustable bound.
///
/// Cloning is cheap; clones share the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    state: Arc<Mutex<GateState>>,
}

#[derive(Debug)]
struct GateState {
    bound: usize,
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl GateState {
    /// Hands free permits to queued waiters, oldest first.
    ///
    /// Waiters whose receiver is gone are skipped without consuming a permit.
    fn grant_waiters(&mut self) -> usize {
        let mut granted = 0;
        while self.in_use < self.bound {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                self.in_use += 1;
                granted += 1;
            }
        }
        granted
    }
}

impl ConcurrencyGate {
    /// Creates a gate admitting up to `bound` concurrent holders.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `bound` is outside
    /// `1..=100`.
    pub fn new(bound: usize) -> Result<Self, EngineError> {
        validate_bound(bound)?;
        Ok(Self {
            state: Arc::new(Mutex::new(GateState {
                bound,
                in_use: 0,
                waiters: VecDeque::new(),
            })),
        })
    }

    /// Returns the current bound.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.lock().bound
    }

    /// Returns the number of permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_use
    }

    /// Returns the number of queued acquisitions. Abandoned acquisitions
    /// leave the queue when their future is dropped.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Changes the bound.
    ///
    /// An increase wakes as many queued callers as the new bound allows. A
    /// decrease leaves granted permits alone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `new_bound` is outside
    /// `1..=100`; the bound is left unchanged.
    #[instrument(level = "debug", skip(self))]
    pub fn resize(&self, new_bound: usize) -> Result<(), EngineError> {
        validate_bound(new_bound)?;
        let mut state = self.lock();
        let previous = state.bound;
        state.bound = new_bound;
        let granted = state.grant_waiters();
        debug!(
            previous,
            new_bound,
            in_use = state.in_use,
            granted,
            "resized concurrency gate"
        );
        Ok(())
    }

    /// Waits for a permit. The permit is returned when the guard is dropped.
    ///
    /// Cancel-safe: dropping the returned future gives up the place in the
    /// queue, and a permit granted to a dropped waiter is passed on.
    pub async fn acquire(&self) -> GatePermit {
        loop {
            let receiver = {
                let mut state = self.lock();
                if state.in_use < state.bound && state.waiters.is_empty() {
                    state.in_use += 1;
                    return GatePermit::new(self.clone());
                }
                let (sender, receiver) = oneshot::channel();
                state.waiters.push_back(sender);
                receiver
            };

            let mut waiter = Waiter {
                gate: self,
                receiver: Some(receiver),
            };
            if waiter.granted().await {
                return GatePermit::new(self.clone());
            }
        }
    }

    /// Runs `operation` while holding a permit.
    ///
    /// The permit is released when `operation` settles, whatever its output,
    /// and also if the returned future is dropped or `operation` panics.
    pub async fn acquire_and_run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        operation().await
    }

    fn release(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.grant_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_bound(bound: usize) -> Result<(), EngineError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&bound) {
        Ok(())
    } else {
        Err(EngineError::InvalidConcurrency { value: bound })
    }
}

/// A queued acquisition.
struct Waiter<'a> {
    gate: &'a ConcurrencyGate,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn granted(&mut self) -> bool {
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        let granted = receiver.await.is_ok();
        if granted {
            self.receiver = None;
        }
        granted
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            // Granted between the send and our drop: hand the permit on.
            if receiver.try_recv().is_ok() {
                self.gate.release();
            } else {
                self.gate.lock().waiters.retain(|sender| !sender.is_closed());
            }
        }
    }
}

/// RAII permit from a [`ConcurrencyGate`].
#[derive(Debug)]
#[must_use = "the permit is released as soon as it is dropped"]
pub struct GatePermit {
    gate: ConcurrencyGate,
}

impl GatePermit {
    fn new(gate: ConcurrencyGate) -> Self {
        Self { gate }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
