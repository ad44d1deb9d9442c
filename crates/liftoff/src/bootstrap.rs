//! Launch orchestration: resolve options, start the runtime, deploy the main
//! workload, and arm the stop triggers.

use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use liftoff_config::{ConfigError, ConfigResolver, LaunchArgs, PropertySource};

use crate::BOOTSTRAP_TARGET;
use crate::context::{ContextCell, LifecycleContext};
use crate::hooks::{HookDispatcher, LifecycleHooks};
use crate::metadata::{
    DEFAULT_FACTORY_ATTRIBUTE, MAIN_WORKLOAD_ATTRIBUTE, MetadataError, MetadataSource,
};
use crate::runtime::{DeploymentTarget, RuntimeFactory, RuntimeHandle};
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::wait::{Cause, Interrupt, WaitOutcome, await_interruptibly, cause};

/// Exit code when the runtime could not be configured or started.
pub const RUNTIME_START_EXIT_CODE: u8 = 11;
/// Exit code when the main workload could not be configured or deployed.
pub const WORKLOAD_DEPLOYMENT_EXIT_CODE: u8 = 15;
/// Default bound on starting, deploying and stopping.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-phase wait bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on starting the runtime.
    pub start: Duration,
    /// Bound on deploying the main workload.
    pub deploy: Duration,
    /// Bound on closing the runtime.
    pub stop: Duration,
}

impl Timeouts {
    /// Uses `timeout` for every phase.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            start: timeout,
            deploy: timeout,
            stop: timeout,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_PHASE_TIMEOUT)
    }
}

/// Progress of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BootstrapState {
    /// Nothing has run yet.
    Idle,
    /// Runtime options are resolved.
    ConfigResolved,
    /// Waiting for the runtime to start.
    RuntimeStarting,
    /// The runtime is up.
    RuntimeStarted,
    /// The runtime did not start.
    RuntimeStartFailed,
    /// Resolving deployment options and the workload name.
    WorkloadResolving,
    /// Waiting for the workload to deploy.
    Deploying,
    /// The workload is running.
    Deployed,
    /// The workload could not be resolved or deployed.
    DeployFailed,
}

/// Why a bounded phase did not succeed.
#[derive(Debug, Error)]
pub enum PhaseFailure {
    /// The wait was interrupted; the cause wraps [`crate::wait::Interrupted`].
    #[error(transparent)]
    Interrupted(Cause),
    /// The phase did not settle within its bound.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    /// The phase settled with a failure.
    #[error(transparent)]
    Failed(Cause),
}

impl PhaseFailure {
    /// Cause handed to the failure hook. Only a timeout has none.
    fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Interrupted(cause) | Self::Failed(cause) => Some(cause),
            Self::TimedOut(_) => None,
        }
    }
}

/// Errors ending a launch before the workload runs.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Runtime options could not be resolved.
    #[error("failed to resolve runtime options: {source}")]
    RuntimeConfig {
        /// Rejected option or document.
        #[source]
        source: ConfigError,
    },
    /// The runtime did not start.
    #[error("failed to start the runtime: {source}")]
    RuntimeStart {
        /// How the start phase ended.
        #[source]
        source: PhaseFailure,
    },
    /// Deployment options could not be resolved.
    #[error("failed to resolve deployment options: {source}")]
    DeploymentConfig {
        /// Rejected option or document.
        #[source]
        source: ConfigError,
    },
    /// The application manifest could not be read.
    #[error("failed to read application metadata: {source}")]
    Metadata {
        /// Read or parse failure.
        #[source]
        source: MetadataError,
    },
    /// Neither the command line nor the manifest named a workload.
    #[error(
        "no workload to deploy: pass a WORKLOAD argument or set the '{MAIN_WORKLOAD_ATTRIBUTE}' manifest attribute"
    )]
    NoWorkload,
    /// The workload did not deploy.
    #[error("failed to deploy {workload}: {source}")]
    Deployment {
        /// Deployment target as displayed.
        workload: String,
        /// How the deploy phase ended.
        #[source]
        source: PhaseFailure,
    },
}

impl BootstrapError {
    /// Process exit code reporting this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::RuntimeConfig { .. } | Self::RuntimeStart { .. } => RUNTIME_START_EXIT_CODE,
            Self::DeploymentConfig { .. }
            | Self::Metadata { .. }
            | Self::NoWorkload
            | Self::Deployment { .. } => WORKLOAD_DEPLOYMENT_EXIT_CODE,
        }
    }
}

/// Everything a launch talks to.
pub struct Collaborators {
    /// Name under which the application's manifest is looked up.
    pub application: String,
    /// Starts the runtime.
    pub runtime_factory: Arc<dyn RuntimeFactory>,
    /// Observes and shapes each phase.
    pub hooks: Arc<dyn LifecycleHooks>,
    /// Supplies the manifest attributes.
    pub metadata: Arc<dyn MetadataSource>,
    /// Supplies the override properties.
    pub properties: Arc<dyn PropertySource>,
    /// External stop trigger armed once the runtime is up.
    pub shutdown_signal: Option<Arc<dyn ShutdownSignal>>,
}

/// A workload running on a started runtime.
pub struct Deployment {
    context: LifecycleContext,
    shutdown: ShutdownCoordinator,
}

impl Deployment {
    /// Final lifecycle snapshot of the launch.
    #[must_use]
    pub fn context(&self) -> &LifecycleContext {
        &self.context
    }

    /// Id the runtime assigned to the deployment.
    #[must_use]
    pub fn deployment_id(&self) -> &str {
        self.context.deployment_id().unwrap_or_default()
    }

    /// Stop controls for the runtime hosting the deployment.
    #[must_use]
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }
}

/// Runs one launch from resolved arguments to a deployed workload.
pub struct Orchestrator {
    collaborators: Collaborators,
    dispatcher: Arc<HookDispatcher>,
    timeouts: Timeouts,
    interrupt: Interrupt,
    state: BootstrapState,
    shutdown: Option<ShutdownCoordinator>,
}

impl Orchestrator {
    /// Creates an idle orchestrator with default timeouts.
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        let dispatcher = Arc::new(HookDispatcher::new(Arc::clone(&collaborators.hooks)));
        Self {
            collaborators,
            dispatcher,
            timeouts: Timeouts::default(),
            interrupt: Interrupt::new(),
            state: BootstrapState::Idle,
            shutdown: None,
        }
    }

    /// Replaces the per-phase wait bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Uses `interrupt` to cut the start and deploy waits short.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Current progress of the launch.
    #[must_use]
    pub const fn state(&self) -> BootstrapState {
        self.state
    }

    /// Stop controls, once the runtime has started.
    #[must_use]
    pub fn shutdown_coordinator(&self) -> Option<&ShutdownCoordinator> {
        self.shutdown.as_ref()
    }

    /// Dispatcher delivering this launch's hooks.
    #[must_use]
    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    fn advance(&mut self, state: BootstrapState) {
        debug!(
            target: BOOTSTRAP_TARGET,
            event = "state",
            from = %self.state,
            to = %state,
            "launch state changed"
        );
        self.state = state;
    }

    /// Runs the launch.
    ///
    /// Configuration errors fire no hook. Every other failure fires the
    /// matching failure hook before it is returned. After a failed deployment
    /// the runtime keeps running unless the hook closes it (the default hook
    /// does).
    pub fn run(&mut self, args: &LaunchArgs) -> Result<Deployment, BootstrapError> {
        let properties = Arc::clone(&self.collaborators.properties);
        let resolver = ConfigResolver::new(args, properties.as_ref());

        let mut runtime_options = resolver.resolve_runtime().map_err(|source| {
            error!(
                target: BOOTSTRAP_TARGET,
                event = "runtime_config_failed",
                error = %source,
                "invalid runtime options"
            );
            BootstrapError::RuntimeConfig { source }
        })?;
        let resolved = LifecycleContext::new(runtime_options.clone());
        self.advance(BootstrapState::ConfigResolved);

        self.dispatcher
            .before_starting_runtime(&resolved, &mut runtime_options);
        let configured = resolved.with_runtime_options(runtime_options);

        let runtime = self.start_runtime(&configured, args.cluster)?;
        let started = configured.runtime_started(Arc::clone(&runtime));
        let cell = ContextCell::new(started.clone());
        self.advance(BootstrapState::RuntimeStarted);
        self.dispatcher.after_runtime_started(&started);
        let shutdown = self.arm_shutdown(&cell, &runtime);

        self.advance(BootstrapState::WorkloadResolving);
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut deployment_options = resolver
            .resolve_deployment(|config| dispatcher.after_config_parsed(config))
            .map_err(|source| {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "deployment_config_failed",
                    error = %source,
                    "invalid deployment options"
                );
                BootstrapError::DeploymentConfig { source }
            })?;

        let (target, workload_name) = match self.dispatcher.workload_factory() {
            Some(factory) => (DeploymentTarget::Factory(factory), None),
            None => {
                let name = self.workload_name(args)?;
                (DeploymentTarget::Named(name.clone()), Some(name))
            }
        };
        let staged = started.ready_to_deploy(workload_name, deployment_options.clone());
        cell.store(staged.clone());

        self.advance(BootstrapState::Deploying);
        self.dispatcher
            .before_deploying_workload(&staged, &mut deployment_options);
        let amended = staged.with_deployment_options(deployment_options.clone());
        cell.store(amended.clone());

        let kind = if deployment_options.is_worker() {
            "worker workload"
        } else {
            "workload"
        };
        let label = target.to_string();
        let outcome = await_interruptibly(
            || runtime.deploy(target, deployment_options),
            self.timeouts.deploy,
            &self.interrupt,
        );
        let failure = match outcome {
            Ok(WaitOutcome::Succeeded(deployment_id)) => {
                info!(
                    target: BOOTSTRAP_TARGET,
                    event = "deployed",
                    workload = %label,
                    deployment_id = %deployment_id,
                    "succeeded in deploying {kind}"
                );
                let deployed = amended.workload_deployed(deployment_id);
                cell.store(deployed.clone());
                self.advance(BootstrapState::Deployed);
                self.dispatcher.after_workload_deployed(&deployed);
                return Ok(Deployment {
                    context: deployed,
                    shutdown,
                });
            }
            Ok(WaitOutcome::Failed(failure)) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "deploy_failed",
                    workload = %label,
                    error = %failure,
                    "failed to deploy {kind}"
                );
                PhaseFailure::Failed(failure)
            }
            Ok(WaitOutcome::TimedOut) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "deploy_timed_out",
                    workload = %label,
                    timeout_ms = self.timeouts.deploy.as_millis(),
                    "timed out waiting for {kind} to deploy"
                );
                PhaseFailure::TimedOut(self.timeouts.deploy)
            }
            Err(interrupted) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "deploy_interrupted",
                    workload = %label,
                    "interrupted while deploying {kind}"
                );
                PhaseFailure::Interrupted(cause(interrupted))
            }
        };
        self.advance(BootstrapState::DeployFailed);
        self.dispatcher
            .after_failure_to_deploy_workload(&amended, failure.cause());
        Err(BootstrapError::Deployment {
            workload: label,
            source: failure,
        })
    }

    fn start_runtime(
        &mut self,
        context: &LifecycleContext,
        clustered: bool,
    ) -> Result<RuntimeHandle, BootstrapError> {
        self.advance(BootstrapState::RuntimeStarting);
        let factory = Arc::clone(&self.collaborators.runtime_factory);
        let outcome = await_interruptibly(
            || factory.start(context.runtime_options(), clustered),
            self.timeouts.start,
            &self.interrupt,
        );
        let failure = match outcome {
            Ok(WaitOutcome::Succeeded(runtime)) => return Ok(runtime),
            Ok(WaitOutcome::Failed(failure)) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "start_failed",
                    clustered,
                    error = %failure,
                    "failed to start the runtime"
                );
                PhaseFailure::Failed(failure)
            }
            Ok(WaitOutcome::TimedOut) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "start_timed_out",
                    clustered,
                    timeout_ms = self.timeouts.start.as_millis(),
                    "timed out waiting for the runtime to start"
                );
                PhaseFailure::TimedOut(self.timeouts.start)
            }
            Err(interrupted) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "start_interrupted",
                    clustered,
                    "interrupted while starting the runtime"
                );
                PhaseFailure::Interrupted(cause(interrupted))
            }
        };
        self.advance(BootstrapState::RuntimeStartFailed);
        self.dispatcher
            .after_failure_to_start_runtime(context, failure.cause());
        Err(BootstrapError::RuntimeStart { source: failure })
    }

    fn arm_shutdown(&mut self, cell: &ContextCell, runtime: &RuntimeHandle) -> ShutdownCoordinator {
        let coordinator = ShutdownCoordinator::new(
            Arc::clone(&self.dispatcher),
            cell.clone(),
            Arc::clone(runtime),
            self.timeouts.stop,
        );
        runtime.add_close_hook(coordinator.close_hook());
        if let Some(signal) = &self.collaborators.shutdown_signal
            && let Err(failure) = coordinator.listen(Arc::clone(signal))
        {
            warn!(
                target: BOOTSTRAP_TARGET,
                event = "shutdown_listener_failed",
                error = %failure,
                "runtime will not stop on termination signals"
            );
        }
        self.shutdown = Some(coordinator.clone());
        coordinator
    }

    fn workload_name(&mut self, args: &LaunchArgs) -> Result<String, BootstrapError> {
        let collaborators = &self.collaborators;
        let attributes = match collaborators.metadata.attributes(&collaborators.application) {
            Ok(attributes) => attributes,
            Err(source) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    event = "metadata_failed",
                    error = %source,
                    "failed to read application metadata"
                );
                self.advance(BootstrapState::DeployFailed);
                return Err(BootstrapError::Metadata { source });
            }
        };

        let Some(name) = args
            .workload
            .clone()
            .or_else(|| attributes.get(MAIN_WORKLOAD_ATTRIBUTE).map(str::to_owned))
        else {
            error!(
                target: BOOTSTRAP_TARGET,
                event = "no_workload",
                "no workload name given and no '{MAIN_WORKLOAD_ATTRIBUTE}' manifest attribute"
            );
            self.advance(BootstrapState::DeployFailed);
            return Err(BootstrapError::NoWorkload);
        };

        Ok(match attributes.get(DEFAULT_FACTORY_ATTRIBUTE) {
            Some(prefix) if !name.contains(':') => format!("{prefix}:{name}"),
            _ => name,
        })
    }
}
