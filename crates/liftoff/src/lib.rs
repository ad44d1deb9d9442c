//! Application launcher for asynchronous runtimes.
//!
//! A launch resolves runtime options, starts a runtime (clustered on
//! request), deploys one main workload on it, and then keeps the process up
//! until a termination signal stops the runtime. Every phase is bounded by a
//! timeout and reported through [`LifecycleHooks`], each transition exactly
//! once. Failures map to fixed exit codes: [`RUNTIME_START_EXIT_CODE`] when
//! the runtime cannot be configured or started and
//! [`WORKLOAD_DEPLOYMENT_EXIT_CODE`] when the workload cannot be resolved or
//! deployed.
//!
//! The launcher drives runtimes through the [`Runtime`] and
//! [`RuntimeFactory`] traits. [`engine`] provides a tokio-backed
//! implementation with a registry of named workloads.

mod application;
mod bootstrap;
mod context;
pub mod engine;
mod hooks;
mod metadata;
mod runtime;
mod shutdown;
mod telemetry;
pub mod wait;
mod workload;

pub use application::{Application, Launch};
pub use bootstrap::{
    BootstrapError, BootstrapState, Collaborators, DEFAULT_PHASE_TIMEOUT, Deployment,
    Orchestrator, PhaseFailure, RUNTIME_START_EXIT_CODE, Timeouts, WORKLOAD_DEPLOYMENT_EXIT_CODE,
};
pub use context::{ContextCell, LifecycleContext};
pub use hooks::{DefaultHooks, HookDispatcher, HookError, LifecycleHooks, Transition};
pub use metadata::{
    Attributes, DEFAULT_FACTORY_ATTRIBUTE, MAIN_CLASS_ATTRIBUTE, MAIN_WORKLOAD_ATTRIBUTE,
    MANIFEST_ENV_VAR, ManifestFile, MetadataError, MetadataSource, StaticMetadata,
};
pub use runtime::{CloseHook, DeploymentTarget, Runtime, RuntimeFactory, RuntimeHandle};
pub use shutdown::{
    ShutdownCoordinator, ShutdownError, ShutdownSignal, StopOutcome, SystemShutdownSignal,
};
pub use telemetry::{LOG_FILTER_ENV, TelemetryError, TelemetryHandle};
pub use wait::{Cause, Completion, Failure, Interrupt, Promise};
pub use workload::{Workload, WorkloadContext, WorkloadFactory};

/// Tracing target for lifecycle hook delivery.
pub const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
/// Tracing target for launch orchestration.
pub const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");
/// Tracing target for the stop phase.
pub const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");
/// Tracing target for the tokio engine.
pub const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

#[cfg(test)]
mod tests;
