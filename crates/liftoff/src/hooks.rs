//! Lifecycle hooks and their exactly-once dispatch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use strum::Display;
use thiserror::Error;
use tracing::{debug, warn};

use liftoff_config::{DeploymentOptions, JsonObject, RuntimeOptions};

use crate::LIFECYCLE_TARGET;
use crate::context::LifecycleContext;
use crate::wait::Cause;
use crate::workload::WorkloadFactory;

/// Callbacks observing (and in places amending) each lifecycle transition.
///
/// Every method has a default; implement only the transitions of interest.
/// Hooks run on the launch thread except the stop hooks, which run on the
/// thread that closes the runtime.
pub trait LifecycleHooks: Send + Sync {
    /// Runs before the runtime starts. Edits to `options` are used to start
    /// it.
    fn before_starting_runtime(&self, context: &LifecycleContext, options: &mut RuntimeOptions) {
        let _ = (context, options);
    }

    /// Runs once the runtime is up; `context` carries its handle.
    fn after_runtime_started(&self, context: &LifecycleContext) {
        let _ = context;
    }

    /// Runs when the runtime could not be started. `cause` is `None` when the
    /// start timed out.
    fn after_failure_to_start_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        let _ = (context, cause);
    }

    /// Sees the workload configuration before it is attached to the
    /// deployment options.
    fn after_config_parsed(&self, config: &mut JsonObject) {
        let _ = config;
    }

    /// Supplies workload instances directly, bypassing name resolution.
    fn workload_factory(&self) -> Option<WorkloadFactory> {
        None
    }

    /// Runs before deployment. Edits to `options` are used to deploy.
    fn before_deploying_workload(&self, context: &LifecycleContext, options: &mut DeploymentOptions) {
        let _ = (context, options);
    }

    /// Runs once the workload is deployed.
    fn after_workload_deployed(&self, context: &LifecycleContext) {
        let _ = context;
    }

    /// Runs when deployment failed. `cause` is `None` when it timed out.
    ///
    /// The default closes the runtime so the process can exit.
    fn after_failure_to_deploy_workload(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        let _ = cause;
        if let Some(runtime) = context.runtime() {
            runtime.close().on_complete(|outcome| {
                if let Err(error) = outcome {
                    warn!(
                        target: LIFECYCLE_TARGET,
                        event = "close_after_deploy_failure",
                        error = %error,
                        "runtime failed to close after deployment failure"
                    );
                }
            });
        }
    }

    /// Runs inside the runtime's close sequence. An error is reported back to
    /// the runtime; it does not stop the close.
    fn before_stopping_runtime(&self, context: &LifecycleContext) -> Result<(), Cause> {
        let _ = context;
        Ok(())
    }

    /// Runs after an external stop closed the runtime cleanly.
    fn after_runtime_stopped(&self, context: &LifecycleContext) {
        let _ = context;
    }

    /// Runs when an external stop did not complete cleanly. `cause` is `None`
    /// when it timed out.
    fn after_failure_to_stop_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        let _ = (context, cause);
    }
}

impl<T> LifecycleHooks for Arc<T>
where
    T: LifecycleHooks + ?Sized,
{
    fn before_starting_runtime(&self, context: &LifecycleContext, options: &mut RuntimeOptions) {
        (**self).before_starting_runtime(context, options);
    }

    fn after_runtime_started(&self, context: &LifecycleContext) {
        (**self).after_runtime_started(context);
    }

    fn after_failure_to_start_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        (**self).after_failure_to_start_runtime(context, cause);
    }

    fn after_config_parsed(&self, config: &mut JsonObject) {
        (**self).after_config_parsed(config);
    }

    fn workload_factory(&self) -> Option<WorkloadFactory> {
        (**self).workload_factory()
    }

    fn before_deploying_workload(&self, context: &LifecycleContext, options: &mut DeploymentOptions) {
        (**self).before_deploying_workload(context, options);
    }

    fn after_workload_deployed(&self, context: &LifecycleContext) {
        (**self).after_workload_deployed(context);
    }

    fn after_failure_to_deploy_workload(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        (**self).after_failure_to_deploy_workload(context, cause);
    }

    fn before_stopping_runtime(&self, context: &LifecycleContext) -> Result<(), Cause> {
        (**self).before_stopping_runtime(context)
    }

    fn after_runtime_stopped(&self, context: &LifecycleContext) {
        (**self).after_runtime_stopped(context);
    }

    fn after_failure_to_stop_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        (**self).after_failure_to_stop_runtime(context, cause);
    }
}

/// Hooks with every default behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl LifecycleHooks for DefaultHooks {}

/// Lifecycle transitions that carry a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    /// [`LifecycleHooks::before_starting_runtime`].
    BeforeStartingRuntime,
    /// [`LifecycleHooks::after_runtime_started`].
    AfterRuntimeStarted,
    /// [`LifecycleHooks::after_failure_to_start_runtime`].
    AfterFailureToStartRuntime,
    /// [`LifecycleHooks::after_config_parsed`].
    AfterConfigParsed,
    /// [`LifecycleHooks::before_deploying_workload`].
    BeforeDeployingWorkload,
    /// [`LifecycleHooks::after_workload_deployed`].
    AfterWorkloadDeployed,
    /// [`LifecycleHooks::after_failure_to_deploy_workload`].
    AfterFailureToDeployWorkload,
    /// [`LifecycleHooks::before_stopping_runtime`].
    BeforeStoppingRuntime,
    /// [`LifecycleHooks::after_runtime_stopped`].
    AfterRuntimeStopped,
    /// [`LifecycleHooks::after_failure_to_stop_runtime`].
    AfterFailureToStopRuntime,
}

impl Transition {
    /// The transition reporting the opposite outcome of the same phase.
    #[must_use]
    pub fn exclusive_with(self) -> Option<Self> {
        match self {
            Self::AfterRuntimeStarted => Some(Self::AfterFailureToStartRuntime),
            Self::AfterFailureToStartRuntime => Some(Self::AfterRuntimeStarted),
            Self::AfterWorkloadDeployed => Some(Self::AfterFailureToDeployWorkload),
            Self::AfterFailureToDeployWorkload => Some(Self::AfterWorkloadDeployed),
            Self::AfterRuntimeStopped => Some(Self::AfterFailureToStopRuntime),
            Self::AfterFailureToStopRuntime => Some(Self::AfterRuntimeStopped),
            _ => None,
        }
    }
}

/// A hook failed while the runtime was closing.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook returned an error.
    #[error("{transition} hook failed: {source}")]
    Failed {
        /// Transition whose hook failed.
        transition: Transition,
        /// Error returned by the hook.
        #[source]
        source: Cause,
    },
    /// The hook panicked.
    #[error("{transition} hook panicked")]
    Panicked {
        /// Transition whose hook panicked.
        transition: Transition,
    },
}

/// Delivers each transition to the registered hooks at most once per launch.
///
/// A transition and its opposite outcome (for example started and failed to
/// start) share one slot: whichever is delivered first wins and the other is
/// suppressed. Panics from hooks propagate to the caller except in
/// [`before_stopping_runtime`](Self::before_stopping_runtime), which runs
/// inside the runtime's close sequence.
pub struct HookDispatcher {
    hooks: Arc<dyn LifecycleHooks>,
    delivered: Mutex<Vec<Transition>>,
}

impl HookDispatcher {
    /// Dispatches to `hooks` with nothing delivered yet.
    #[must_use]
    pub fn new(hooks: Arc<dyn LifecycleHooks>) -> Self {
        Self {
            hooks,
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Transitions delivered so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Transition> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn claim(&self, transition: Transition) -> bool {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        let taken = delivered.contains(&transition)
            || transition
                .exclusive_with()
                .is_some_and(|other| delivered.contains(&other));
        if taken {
            debug!(
                target: LIFECYCLE_TARGET,
                event = "hook_suppressed",
                transition = %transition,
                "transition already delivered"
            );
            return false;
        }
        delivered.push(transition);
        debug!(
            target: LIFECYCLE_TARGET,
            event = "hook",
            transition = %transition,
            "delivering lifecycle hook"
        );
        true
    }

    /// Delivers the pre-start hook, which may amend `options`.
    pub fn before_starting_runtime(&self, context: &LifecycleContext, options: &mut RuntimeOptions) {
        if self.claim(Transition::BeforeStartingRuntime) {
            self.hooks.before_starting_runtime(context, options);
        }
    }

    /// Reports a started runtime.
    pub fn after_runtime_started(&self, context: &LifecycleContext) {
        if self.claim(Transition::AfterRuntimeStarted) {
            self.hooks.after_runtime_started(context);
        }
    }

    /// Reports a runtime that failed to start or timed out (`cause` is
    /// `None` on timeout).
    pub fn after_failure_to_start_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        if self.claim(Transition::AfterFailureToStartRuntime) {
            self.hooks.after_failure_to_start_runtime(context, cause);
        }
    }

    /// Hands the workload configuration to the hooks for amendment.
    pub fn after_config_parsed(&self, config: &mut JsonObject) {
        if self.claim(Transition::AfterConfigParsed) {
            self.hooks.after_config_parsed(config);
        }
    }

    /// Factory supplied by the hooks, if any. Not a transition, so never
    /// suppressed.
    #[must_use]
    pub fn workload_factory(&self) -> Option<WorkloadFactory> {
        self.hooks.workload_factory()
    }

    /// Delivers the pre-deploy hook, which may amend `options`.
    pub fn before_deploying_workload(&self, context: &LifecycleContext, options: &mut DeploymentOptions) {
        if self.claim(Transition::BeforeDeployingWorkload) {
            self.hooks.before_deploying_workload(context, options);
        }
    }

    /// Reports a deployed workload.
    pub fn after_workload_deployed(&self, context: &LifecycleContext) {
        if self.claim(Transition::AfterWorkloadDeployed) {
            self.hooks.after_workload_deployed(context);
        }
    }

    /// Reports a failed or timed out deployment.
    pub fn after_failure_to_deploy_workload(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        if self.claim(Transition::AfterFailureToDeployWorkload) {
            self.hooks.after_failure_to_deploy_workload(context, cause);
        }
    }

    /// Runs the pre-stop hook, converting an error or a panic into a
    /// [`HookError`].
    pub fn before_stopping_runtime(&self, context: &LifecycleContext) -> Result<(), HookError> {
        let transition = Transition::BeforeStoppingRuntime;
        if !self.claim(transition) {
            return Ok(());
        }
        let hooks = Arc::clone(&self.hooks);
        match panic::catch_unwind(AssertUnwindSafe(|| hooks.before_stopping_runtime(context))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HookError::Failed { transition, source }),
            Err(_) => Err(HookError::Panicked { transition }),
        }
    }

    /// Reports a stopped runtime.
    pub fn after_runtime_stopped(&self, context: &LifecycleContext) {
        if self.claim(Transition::AfterRuntimeStopped) {
            self.hooks.after_runtime_stopped(context);
        }
    }

    /// Reports a stop that failed or timed out.
    pub fn after_failure_to_stop_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        if self.claim(Transition::AfterFailureToStopRuntime) {
            self.hooks.after_failure_to_stop_runtime(context, cause);
        }
    }
}
