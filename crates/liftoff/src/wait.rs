//! Single-assignment completions and bounded blocking waits over them.
//!
//! A [`Promise`] is the write side of an asynchronous outcome and a
//! [`Completion`] the read side. The launcher drives the runtime from one
//! blocking thread, so every asynchronous call is bridged through
//! [`await_interruptibly`] or [`await_uninterruptibly`], which distinguish a
//! delivered outcome from an elapsed deadline and from an [`Interrupt`].

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Failure cause carried by an asynchronous outcome.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Wraps an error as a shareable [`Cause`].
pub fn cause<E>(error: E) -> Cause
where
    E: Error + Send + Sync + 'static,
{
    Arc::new(error)
}

/// Plain-text failure for outcomes that have no richer error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Failure(String);

impl Failure {
    /// Wraps `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The waiting thread was interrupted before an outcome arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted while waiting for an asynchronous outcome")]
pub struct Interrupted;

/// Three-way result of a bounded wait.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// The operation completed successfully.
    Succeeded(T),
    /// The operation completed with a failure.
    Failed(Cause),
    /// The deadline elapsed with no outcome.
    TimedOut,
}

impl<T> WaitOutcome<T> {
    /// Returns `true` when the deadline elapsed.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

impl<T> From<Result<T, Cause>> for WaitOutcome<T> {
    fn from(result: Result<T, Cause>) -> Self {
        match result {
            Ok(value) => Self::Succeeded(value),
            Err(cause) => Self::Failed(cause),
        }
    }
}

type Callback<T> = Box<dyn FnOnce(Result<T, Cause>) + Send>;

struct State<T> {
    outcome: Option<Result<T, Cause>>,
    callback: Option<Callback<T>>,
    settled: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates an unsettled promise and the completion observing it.
#[must_use]
pub fn pending<T>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            outcome: None,
            callback: None,
            settled: false,
        }),
        settled: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Completion { shared },
    )
}

/// Write side of a single asynchronous outcome.
///
/// Settling consumes the promise, so an outcome is delivered at most once.
/// Dropping an unsettled promise fails its completion.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    /// Delivers a success value.
    pub fn complete(self, value: T) {
        self.settle(Ok(value));
    }

    /// Delivers a failure.
    pub fn fail(self, cause: Cause) {
        self.settle(Err(cause));
    }

    /// Delivers an outcome.
    pub fn settle(mut self, outcome: Result<T, Cause>) {
        if let Some(shared) = self.shared.take() {
            deliver(&shared, outcome);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            deliver(
                &shared,
                Err(cause(Failure::new("promise dropped without an outcome"))),
            );
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Promise")
            .field("settled", &self.shared.is_none())
            .finish()
    }
}

fn deliver<T>(shared: &Shared<T>, outcome: Result<T, Cause>) {
    let mut state = shared.lock();
    state.settled = true;
    if let Some(callback) = state.callback.take() {
        drop(state);
        callback(outcome);
    } else {
        state.outcome = Some(outcome);
        drop(state);
    }
    shared.settled.notify_all();
}

/// Read side of a single asynchronous outcome.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// A completion that is already settled.
    #[must_use]
    pub fn ready(outcome: Result<T, Cause>) -> Self {
        let (promise, completion) = pending();
        promise.settle(outcome);
        completion
    }

    /// An already settled successful completion.
    #[must_use]
    pub fn succeeded(value: T) -> Self {
        Self::ready(Ok(value))
    }

    /// An already settled failed completion.
    #[must_use]
    pub fn failed(cause: Cause) -> Self {
        Self::ready(Err(cause))
    }

    /// Whether an outcome has been delivered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.lock().settled
    }

    /// Runs `callback` with the outcome, immediately when already settled or
    /// otherwise on the thread that settles the promise.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<T, Cause>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        if let Some(outcome) = state.outcome.take() {
            drop(state);
            callback(outcome);
        } else {
            state.callback = Some(Box::new(callback));
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Transforms a successful outcome.
    #[must_use]
    pub fn map<U, F>(self, transform: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, completion) = pending();
        self.on_complete(move |outcome| promise.settle(outcome.map(transform)));
        completion
    }

    /// Chains a follow-up asynchronous step after a success.
    #[must_use]
    pub fn and_then<U, F>(self, next: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        let (promise, completion) = pending();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => next(value).on_complete(move |chained| promise.settle(chained)),
            Err(failure) => promise.fail(failure),
        });
        completion
    }

    fn block(&self, deadline: Option<Instant>, interrupt: &Interrupt) -> Blocked<T> {
        let shared = Arc::clone(&self.shared);
        let _watch = interrupt.watch(Arc::new(move || {
            let _state = shared.lock();
            shared.settled.notify_all();
        }));

        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return Blocked::Settled(outcome);
            }
            if interrupt.is_interrupted() {
                return Blocked::Interrupted;
            }
            state = match deadline {
                None => self
                    .shared
                    .settled
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Blocked::TimedOut;
                    }
                    self.shared
                        .settled
                        .wait_timeout(state, deadline - now)
                        .map_or_else(|poisoned| poisoned.into_inner().0, |(guard, _)| guard)
                }
            };
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Completion")
            .field("settled", &self.is_settled())
            .finish()
    }
}

enum Blocked<T> {
    Settled(Result<T, Cause>),
    TimedOut,
    Interrupted,
}

type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct InterruptInner {
    flag: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

/// Cloneable interruption token for threads blocked in a bounded wait.
///
/// Interrupting sets a sticky flag and wakes every wait currently watching
/// the token. The flag stays set until [`clear`](Self::clear) is called.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

impl Interrupt {
    /// A token that is not interrupted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes watching waits.
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let wakers: Vec<Waker> = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, waker)| Arc::clone(waker))
            .collect();
        for waker in wakers {
            waker();
        }
    }

    /// Whether the flag is set.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.inner.flag.swap(false, Ordering::SeqCst)
    }

    /// Re-sets the flag without waking anyone.
    pub fn restore(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
    }

    fn watch(&self, waker: Waker) -> WatchGuard<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, waker));
        WatchGuard { interrupt: self, id }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

struct WatchGuard<'a> {
    interrupt: &'a Interrupt,
    id: u64,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.interrupt
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

/// Starts an operation and blocks until it settles, `timeout` elapses, or
/// `interrupt` fires.
///
/// `start` runs exactly once. On interruption the call returns
/// [`Interrupted`] promptly and leaves the interrupt flag set for the caller.
pub fn await_interruptibly<T, F>(
    start: F,
    timeout: Duration,
    interrupt: &Interrupt,
) -> Result<WaitOutcome<T>, Interrupted>
where
    T: Send + 'static,
    F: FnOnce() -> Completion<T>,
{
    let completion = start();
    let deadline = Instant::now().checked_add(timeout);
    match completion.block(deadline, interrupt) {
        Blocked::Settled(outcome) => Ok(outcome.into()),
        Blocked::TimedOut => Ok(WaitOutcome::TimedOut),
        Blocked::Interrupted => Err(Interrupted),
    }
}

/// Starts an operation and blocks until it settles or `timeout` elapses,
/// ignoring interrupts in between.
///
/// Interrupts received while waiting do not extend or shorten the deadline,
/// which is fixed when the call starts. If any arrived, the interrupt flag is
/// set again before returning.
pub fn await_uninterruptibly<T, F>(start: F, timeout: Duration, interrupt: &Interrupt) -> WaitOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> Completion<T>,
{
    let completion = start();
    let deadline = Instant::now().checked_add(timeout);
    let mut interrupted = false;
    let outcome = loop {
        match completion.block(deadline, interrupt) {
            Blocked::Settled(outcome) => break outcome.into(),
            Blocked::TimedOut => break WaitOutcome::TimedOut,
            Blocked::Interrupted => {
                interrupted |= interrupt.clear();
            }
        }
    };
    if interrupted {
        interrupt.restore();
    }
    outcome
}
