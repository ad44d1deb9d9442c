//! Stopping a started runtime, from a termination signal or from within.
//!
//! Once the runtime is up the launcher arms two triggers. A close hook on the
//! runtime runs the pre-stop lifecycle hook whenever the runtime closes, no
//! matter who asked. An external trigger (a [`ShutdownSignal`]) closes the
//! runtime and reports the outcome through the post-stop hooks. Both paths
//! converge on one [`ShutdownCoordinator`], so the stop outcome is reported
//! once.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::SHUTDOWN_TARGET;
use crate::context::ContextCell;
use crate::hooks::HookDispatcher;
use crate::runtime::{CloseHook, RuntimeHandle};
use crate::wait::{Cause, Interrupt, WaitOutcome, await_uninterruptibly, cause};

/// External trigger that asks a running launch to stop.
pub trait ShutdownSignal: Send + Sync {
    /// Returns once the launch should stop.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors raised while arming a [`ShutdownSignal`].
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The signal handlers could not be registered.
    #[error("could not register termination signal handlers: {source}")]
    Install {
        /// Registration error.
        #[source]
        source: io::Error,
    },
    /// The thread waiting on the signal could not be spawned.
    #[error("could not start the shutdown listener thread: {source}")]
    Spawn {
        /// Spawn error.
        #[source]
        source: io::Error,
    },
}

const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Stops the launch on SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Listens for the process termination signals.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut pending = Signals::new(TERMINATION_SIGNALS)
            .map_err(|source| ShutdownError::Install { source })?;
        let received = pending.forever().next();
        info!(
            target: SHUTDOWN_TARGET,
            event = "signal",
            signal = received,
            "termination requested"
        );
        Ok(())
    }
}

/// How an external stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The runtime closed cleanly.
    Stopped,
    /// The runtime did not close within the stop timeout.
    TimedOut,
    /// The runtime reported a failure while closing.
    Failed,
}

enum StopState {
    Idle,
    Stopping { since: Instant },
    Done(StopOutcome),
}

struct Shared {
    dispatcher: Arc<HookDispatcher>,
    context: ContextCell,
    runtime: RuntimeHandle,
    timeout: Duration,
    interrupt: Interrupt,
    state: Mutex<StopState>,
    done: Condvar,
    reporting: Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives the stop phase of a launch.
///
/// Every route to a stopped runtime is bounded by the stop timeout, measured
/// from the moment the close began. The first route to settle reports the
/// outcome; later routes return it.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shared: Arc<Shared>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator for `runtime`, reading the latest lifecycle
    /// snapshot from `context` whenever a hook fires.
    #[must_use]
    pub fn new(
        dispatcher: Arc<HookDispatcher>,
        context: ContextCell,
        runtime: RuntimeHandle,
        timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                context,
                runtime,
                timeout,
                interrupt: Interrupt::new(),
                state: Mutex::new(StopState::Idle),
                done: Condvar::new(),
                reporting: Mutex::new(()),
            }),
        }
    }

    /// Interrupt token of the stop wait. Interrupts are recorded but never
    /// cut the wait short.
    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.shared.interrupt
    }

    /// Builds the hook registered on the runtime.
    ///
    /// It runs the pre-stop lifecycle hook and reports its result back to the
    /// runtime. When the close was not requested through [`stop`](Self::stop)
    /// the coordinator also follows the close to its end so the post-stop
    /// hooks still fire; [`wait_for_termination`](Self::wait_for_termination)
    /// bounds that follow-up by the stop timeout.
    #[must_use]
    pub fn close_hook(&self) -> CloseHook {
        let coordinator = self.clone();
        Box::new(move |promise| {
            let shared = &coordinator.shared;
            match shared.dispatcher.before_stopping_runtime(&shared.context.load()) {
                Ok(()) => promise.complete(()),
                Err(failure) => {
                    warn!(
                        target: SHUTDOWN_TARGET,
                        event = "before_stopping_failed",
                        error = %failure,
                        "pre-stop hook failed"
                    );
                    promise.fail(cause(failure));
                }
            }
            if coordinator.begin() {
                let follower = coordinator.clone();
                shared.runtime.close().on_complete(move |outcome| {
                    follower.finish(outcome.into());
                });
            }
        })
    }

    /// Spawns a thread that stops the runtime once `signal` fires.
    pub fn listen(&self, signal: Arc<dyn ShutdownSignal>) -> Result<(), ShutdownError> {
        let coordinator = self.clone();
        thread::Builder::new()
            .name("liftoff-shutdown".to_owned())
            .spawn(move || match signal.wait() {
                Ok(()) => {
                    coordinator.stop();
                }
                Err(failure) => error!(
                    target: SHUTDOWN_TARGET,
                    event = "listener_failed",
                    error = %failure,
                    "shutdown listener failed; the runtime will not stop on signals"
                ),
            })
            .map(drop)
            .map_err(|source| ShutdownError::Spawn { source })
    }

    /// Closes the runtime, waiting at most the stop timeout, and reports the
    /// outcome through the post-stop hooks.
    ///
    /// A close already in flight is joined rather than restarted, and the
    /// wait stays bounded. Once an outcome is reported, later calls return
    /// it.
    pub fn stop(&self) -> StopOutcome {
        if self.begin() {
            info!(target: SHUTDOWN_TARGET, event = "stopping", "stopping runtime");
        }
        let outcome = await_uninterruptibly(
            || self.shared.runtime.close(),
            self.shared.timeout,
            &self.shared.interrupt,
        );
        self.finish(outcome)
    }

    /// Blocks until the runtime has stopped by any route.
    ///
    /// Waits without bound while no close has begun. Once one has, waits at
    /// most the stop timeout from its start and then reports a timed-out
    /// stop.
    pub fn wait_for_termination(&self) -> StopOutcome {
        let mut state = self.shared.lock();
        loop {
            match *state {
                StopState::Done(outcome) => return outcome,
                StopState::Idle => {
                    state = self
                        .shared
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                StopState::Stopping { since } => {
                    let remaining = self.shared.timeout.saturating_sub(since.elapsed());
                    if remaining.is_zero() {
                        drop(state);
                        return self.finish(WaitOutcome::TimedOut);
                    }
                    let (guard, _) = self
                        .shared
                        .done
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }

    /// Outcome of a finished stop, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<StopOutcome> {
        match *self.shared.lock() {
            StopState::Done(outcome) => Some(outcome),
            StopState::Idle | StopState::Stopping { .. } => None,
        }
    }

    fn begin(&self) -> bool {
        let mut state = self.shared.lock();
        if matches!(*state, StopState::Idle) {
            *state = StopState::Stopping {
                since: Instant::now(),
            };
            self.shared.done.notify_all();
            return true;
        }
        false
    }

    /// Reports `outcome` unless another route already did, and returns the
    /// reported outcome.
    fn finish(&self, outcome: WaitOutcome<()>) -> StopOutcome {
        let shared = &self.shared;
        let _reporting = shared
            .reporting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let StopState::Done(reported) = *shared.lock() {
            return reported;
        }
        let context = shared.context.load();
        let result = match outcome {
            WaitOutcome::Succeeded(()) => {
                info!(target: SHUTDOWN_TARGET, event = "stopped", "runtime stopped");
                shared.dispatcher.after_runtime_stopped(&context);
                StopOutcome::Stopped
            }
            WaitOutcome::TimedOut => {
                error!(
                    target: SHUTDOWN_TARGET,
                    event = "stop_timed_out",
                    timeout_ms = shared.timeout.as_millis(),
                    "timed out waiting for the runtime to stop"
                );
                shared.dispatcher.after_failure_to_stop_runtime(&context, None);
                StopOutcome::TimedOut
            }
            WaitOutcome::Failed(failure) => {
                report_failure(&failure);
                shared
                    .dispatcher
                    .after_failure_to_stop_runtime(&context, Some(&failure));
                StopOutcome::Failed
            }
        };
        *shared.lock() = StopState::Done(result);
        shared.done.notify_all();
        result
    }
}

fn report_failure(failure: &Cause) {
    error!(
        target: SHUTDOWN_TARGET,
        event = "stop_failed",
        error = %failure,
        "failure in stopping the runtime"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    use liftoff_config::RuntimeOptions;

    use super::*;
    use crate::context::LifecycleContext;
    use crate::hooks::LifecycleHooks;
    use crate::runtime::Runtime;
    use crate::tests::support::{HookEvent, RecordingHooks, ScriptedRuntime, TestShutdownSignal};

    fn coordinator(
        hooks: &Arc<RecordingHooks>,
        runtime: &Arc<ScriptedRuntime>,
        timeout: Duration,
    ) -> ShutdownCoordinator {
        let handle: RuntimeHandle = Arc::clone(runtime) as RuntimeHandle;
        let context = LifecycleContext::new(RuntimeOptions::default()).runtime_started(Arc::clone(&handle));
        let dispatcher = Arc::new(HookDispatcher::new(Arc::clone(hooks) as Arc<dyn LifecycleHooks>));
        let coordinator = ShutdownCoordinator::new(dispatcher, ContextCell::new(context), handle, timeout);
        runtime.add_close_hook(coordinator.close_hook());
        coordinator
    }

    #[test]
    fn stop_runs_both_stop_hooks_once() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_secs(5));

        assert_eq!(coordinator.stop(), StopOutcome::Stopped);
        assert_eq!(coordinator.stop(), StopOutcome::Stopped);

        assert_eq!(
            hooks.events(),
            vec![HookEvent::BeforeStoppingRuntime, HookEvent::AfterRuntimeStopped]
        );
    }

    #[test]
    fn stop_that_outlives_the_timeout_reports_no_cause() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new().with_hanging_close());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_millis(50));

        assert_eq!(coordinator.stop(), StopOutcome::TimedOut);
        assert_eq!(
            hooks.events(),
            vec![HookEvent::AfterFailureToStopRuntime { cause: None }]
        );
    }

    #[test]
    fn failed_close_reports_its_cause() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new().with_failing_close("disk on fire"));
        let coordinator = coordinator(&hooks, &runtime, Duration::from_secs(5));

        assert_eq!(coordinator.stop(), StopOutcome::Failed);
        assert_eq!(
            hooks.events(),
            vec![
                HookEvent::BeforeStoppingRuntime,
                HookEvent::AfterFailureToStopRuntime {
                    cause: Some("disk on fire".to_owned())
                },
            ]
        );
    }

    #[test]
    fn in_process_close_still_reports_the_stop() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_secs(5));

        drop(runtime.close());

        assert_eq!(coordinator.wait_for_termination(), StopOutcome::Stopped);
        assert_eq!(coordinator.stop(), StopOutcome::Stopped);
        assert_eq!(
            hooks.events(),
            vec![HookEvent::BeforeStoppingRuntime, HookEvent::AfterRuntimeStopped]
        );
    }

    #[test]
    fn stop_stays_bounded_when_an_in_flight_close_never_finishes() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new().with_stuck_close());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_millis(100));
        drop(runtime.close());

        let (sender, receiver) = mpsc::channel();
        let stopping = coordinator.clone();
        thread::spawn(move || sender.send(stopping.stop()));
        let outcome = receiver
            .recv_timeout(Duration::from_secs(3))
            .expect("stop should return within its timeout");

        assert_eq!(outcome, StopOutcome::TimedOut);
        assert_eq!(
            hooks.events(),
            vec![
                HookEvent::BeforeStoppingRuntime,
                HookEvent::AfterFailureToStopRuntime { cause: None },
            ]
        );
    }

    #[test]
    fn waiting_on_a_stuck_in_process_close_times_out() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new().with_stuck_close());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_millis(100));
        drop(runtime.close());

        assert_eq!(coordinator.wait_for_termination(), StopOutcome::TimedOut);
        assert_eq!(coordinator.stop(), StopOutcome::TimedOut);
        assert_eq!(
            hooks.events(),
            vec![
                HookEvent::BeforeStoppingRuntime,
                HookEvent::AfterFailureToStopRuntime { cause: None },
            ]
        );
    }

    #[test]
    fn signal_triggers_a_stop() {
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(&hooks, &runtime, Duration::from_secs(5));
        let signal = TestShutdownSignal::default();

        coordinator
            .listen(Arc::new(signal.clone()))
            .expect("listener should spawn");
        signal.trigger();

        assert_eq!(coordinator.wait_for_termination(), StopOutcome::Stopped);
        assert!(hooks.events().contains(&HookEvent::AfterRuntimeStopped));
    }
}
