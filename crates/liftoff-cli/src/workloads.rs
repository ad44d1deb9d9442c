//! Workloads bundled with the launcher binary.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use liftoff::engine::WorkloadRegistry;
use liftoff::wait::{Cause, Failure, cause};
use liftoff::{Workload, WorkloadContext};

const WORKLOAD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workload");

const DEFAULT_HEARTBEAT_MS: u64 = 1_000;

/// Registry of the bundled workloads.
pub fn registry() -> WorkloadRegistry {
    WorkloadRegistry::new()
        .with("heartbeat", Heartbeat::default)
        .with("echo-config", || EchoConfig)
}

/// Logs a heartbeat every `intervalMs` milliseconds (default 1000).
#[derive(Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
}

impl Workload for Heartbeat {
    fn start(&mut self, context: &WorkloadContext) -> Result<(), Cause> {
        let period = match context.config().get("intervalMs") {
            None => DEFAULT_HEARTBEAT_MS,
            Some(value) => value
                .as_u64()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| cause(Failure::new("intervalMs must be a positive integer")))?,
        };
        let deployment_id = context.deployment_id().to_owned();
        let instance = context.instance();
        self.task = Some(context.handle().spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period));
            let mut beats: u64 = 0;
            loop {
                ticker.tick().await;
                beats += 1;
                info!(
                    target: WORKLOAD_TARGET,
                    event = "heartbeat",
                    deployment_id = %deployment_id,
                    instance,
                    beats,
                    "heartbeat"
                );
            }
        }));
        Ok(())
    }

    fn stop(&mut self, _context: &WorkloadContext) -> Result<(), Cause> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

/// Logs the configuration it was deployed with.
pub struct EchoConfig;

impl Workload for EchoConfig {
    fn start(&mut self, context: &WorkloadContext) -> Result<(), Cause> {
        info!(
            target: WORKLOAD_TARGET,
            event = "config",
            deployment_id = context.deployment_id(),
            instance = context.instance(),
            config = %serde_json::Value::Object(context.config().clone()),
            "workload configuration"
        );
        Ok(())
    }
}
