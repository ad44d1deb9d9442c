//! Units of application logic deployed on the runtime.

use std::sync::Arc;

use liftoff_config::JsonObject;
use tokio::runtime::Handle;

use crate::wait::Cause;

/// A deployable unit of work.
///
/// `start` runs once per instance, on an event loop task or a blocking worker
/// thread depending on the deployment. Long-running work should be spawned
/// through [`WorkloadContext::handle`] rather than performed inline.
pub trait Workload: Send {
    /// Starts the instance. An error fails the whole deployment.
    fn start(&mut self, context: &WorkloadContext) -> Result<(), Cause>;

    /// Stops the instance when its deployment is undeployed or the runtime
    /// closes.
    fn stop(&mut self, context: &WorkloadContext) -> Result<(), Cause> {
        let _ = context;
        Ok(())
    }
}

/// Produces fresh workload instances.
pub type WorkloadFactory = Arc<dyn Fn() -> Box<dyn Workload> + Send + Sync>;

/// Per-instance view of a deployment.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    deployment_id: String,
    instance: u32,
    config: Arc<JsonObject>,
    handle: Handle,
}

impl WorkloadContext {
    pub(crate) fn new(deployment_id: String, instance: u32, config: Arc<JsonObject>, handle: Handle) -> Self {
        Self {
            deployment_id,
            instance,
            config,
            handle,
        }
    }

    /// Identifier of the deployment this instance belongs to.
    #[must_use]
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Zero-based instance index within the deployment.
    #[must_use]
    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Configuration supplied through the deployment options.
    #[must_use]
    pub fn config(&self) -> &JsonObject {
        &self.config
    }

    /// Runtime handle for spawning the instance's background work.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
