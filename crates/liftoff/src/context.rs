//! Immutable snapshots of what a launch has established so far.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use liftoff_config::{DeploymentOptions, RuntimeOptions};

use crate::runtime::RuntimeHandle;

/// Everything known about a launch at one point in its lifecycle.
///
/// Each phase derives a new snapshot from the previous one. Fields are only
/// ever added, in order: runtime options, runtime handle, workload identity
/// and deployment options, deployment id. A snapshot handed to a hook never
/// changes afterwards.
#[derive(Clone)]
pub struct LifecycleContext {
    runtime_options: Arc<RuntimeOptions>,
    runtime: Option<RuntimeHandle>,
    workload_name: Option<String>,
    deployment_options: Option<Arc<DeploymentOptions>>,
    deployment_id: Option<String>,
}

impl LifecycleContext {
    /// Creates the first snapshot from resolved runtime options.
    #[must_use]
    pub fn new(runtime_options: RuntimeOptions) -> Self {
        Self {
            runtime_options: Arc::new(runtime_options),
            runtime: None,
            workload_name: None,
            deployment_options: None,
            deployment_id: None,
        }
    }

    /// Replaces the staged runtime options before the runtime starts.
    ///
    /// Returns `self` unchanged once a runtime handle is present.
    #[must_use]
    pub fn with_runtime_options(&self, runtime_options: RuntimeOptions) -> Self {
        if self.runtime.is_some() {
            return self.clone();
        }
        Self {
            runtime_options: Arc::new(runtime_options),
            ..self.clone()
        }
    }

    /// Records the running runtime.
    #[must_use]
    pub fn runtime_started(&self, runtime: RuntimeHandle) -> Self {
        Self {
            runtime: Some(runtime),
            ..self.clone()
        }
    }

    /// Records the workload about to be deployed. `workload_name` is `None`
    /// when the workload comes from a factory.
    #[must_use]
    pub fn ready_to_deploy(
        &self,
        workload_name: Option<String>,
        deployment_options: DeploymentOptions,
    ) -> Self {
        Self {
            workload_name: workload_name.or_else(|| self.workload_name.clone()),
            deployment_options: Some(Arc::new(deployment_options)),
            ..self.clone()
        }
    }

    /// Replaces the staged deployment options before deployment starts.
    ///
    /// Returns `self` unchanged once a deployment id is present.
    #[must_use]
    pub fn with_deployment_options(&self, deployment_options: DeploymentOptions) -> Self {
        if self.deployment_id.is_some() {
            return self.clone();
        }
        Self {
            deployment_options: Some(Arc::new(deployment_options)),
            ..self.clone()
        }
    }

    /// Records the id of the running deployment.
    #[must_use]
    pub fn workload_deployed(&self, deployment_id: impl Into<String>) -> Self {
        Self {
            deployment_id: Some(deployment_id.into()),
            ..self.clone()
        }
    }

    /// Options the runtime was, or will be, started with.
    #[must_use]
    pub fn runtime_options(&self) -> &RuntimeOptions {
        &self.runtime_options
    }

    /// The running runtime, from `runtime_started` onwards.
    #[must_use]
    pub fn runtime(&self) -> Option<&RuntimeHandle> {
        self.runtime.as_ref()
    }

    /// The workload name, absent for factory-supplied workloads.
    #[must_use]
    pub fn workload_name(&self) -> Option<&str> {
        self.workload_name.as_deref()
    }

    /// Options of the main deployment, once resolved.
    #[must_use]
    pub fn deployment_options(&self) -> Option<&DeploymentOptions> {
        self.deployment_options.as_deref()
    }

    /// Identifier of the main deployment, once deployed.
    #[must_use]
    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }
}

impl fmt::Debug for LifecycleContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LifecycleContext")
            .field("runtime_options", &self.runtime_options)
            .field("runtime_started", &self.runtime.is_some())
            .field("workload_name", &self.workload_name)
            .field("deployment_options", &self.deployment_options)
            .field("deployment_id", &self.deployment_id)
            .finish()
    }
}

/// Latest published snapshot, shared between the launch thread and threads
/// that observe it later (close hooks and signal handlers).
///
/// Publishing swaps the whole snapshot; readers get a clone and never see a
/// partially updated context.
#[derive(Debug, Clone)]
pub struct ContextCell {
    current: Arc<RwLock<LifecycleContext>>,
}

impl ContextCell {
    /// Starts from `context`.
    #[must_use]
    pub fn new(context: LifecycleContext) -> Self {
        Self {
            current: Arc::new(RwLock::new(context)),
        }
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub fn load(&self) -> LifecycleContext {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a new snapshot.
    pub fn store(&self, context: LifecycleContext) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = context;
    }
}
