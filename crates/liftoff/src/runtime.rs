//! Contract between the launcher and the runtime it drives.

use std::fmt;
use std::sync::Arc;

use liftoff_config::{DeploymentOptions, RuntimeOptions};

use crate::wait::{Completion, Promise};
use crate::workload::WorkloadFactory;

/// Shared handle to a started runtime.
pub type RuntimeHandle = Arc<dyn Runtime>;

/// Callback run by the runtime before it tears down. The runtime waits for the
/// promise before continuing its close sequence.
pub type CloseHook = Box<dyn FnOnce(Promise<()>) + Send>;

/// A started asynchronous runtime.
pub trait Runtime: Send + Sync {
    /// Registers a callback to run at the start of [`close`](Self::close).
    fn add_close_hook(&self, hook: CloseHook);

    /// Closes the runtime. Repeated calls observe the same close.
    fn close(&self) -> Completion<()>;

    /// Deploys a workload, completing with its deployment id once every
    /// instance has started.
    fn deploy(&self, target: DeploymentTarget, options: DeploymentOptions) -> Completion<String>;

    /// Whether the runtime joined a cluster.
    fn is_clustered(&self) -> bool;
}

/// Builds and starts runtimes.
pub trait RuntimeFactory: Send + Sync {
    /// Starts a runtime, forming a cluster first when `clustered` is set.
    fn start(&self, options: &RuntimeOptions, clustered: bool) -> Completion<RuntimeHandle>;
}

/// What to deploy.
#[derive(Clone)]
pub enum DeploymentTarget {
    /// A workload resolved by name, optionally qualified as `factory:name`.
    Named(String),
    /// Instances produced by a caller-supplied factory.
    Factory(WorkloadFactory),
}

impl fmt::Debug for DeploymentTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => formatter.debug_tuple("Named").field(name).finish(),
            Self::Factory(_) => formatter.write_str("Factory(..)"),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => formatter.write_str(name),
            Self::Factory(_) => formatter.write_str("<factory>"),
        }
    }
}
