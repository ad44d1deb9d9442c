use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{SetterError, TimeUnit, positive, positive_long};
use crate::binding::{Binding, PropertyRegistry};
use crate::json::JsonObject;
use crate::resolver::DEPLOYMENT_OPTIONS_PREFIX;

const DEFAULT_WORKER_POOL_SIZE: i32 = 20;
const DEFAULT_MAX_WORKER_EXECUTE_TIME_NS: i64 = 60_000_000_000;

/// Where workload instances execute.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadingModel {
    /// Cooperative tasks on the runtime's event loop threads.
    #[default]
    EventLoop,
    /// Dedicated blocking worker threads.
    Worker,
}

/// How the main workload is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeploymentOptions {
    worker: bool,
    instances: i32,
    config: JsonObject,
    worker_pool_name: Option<String>,
    worker_pool_size: i32,
    ha: bool,
    threading_model: ThreadingModel,
    max_worker_execute_time: i64,
    max_worker_execute_time_unit: TimeUnit,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            worker: false,
            instances: 1,
            config: JsonObject::new(),
            worker_pool_name: None,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            ha: false,
            threading_model: ThreadingModel::EventLoop,
            max_worker_execute_time: DEFAULT_MAX_WORKER_EXECUTE_TIME_NS,
            max_worker_execute_time_unit: TimeUnit::Nanoseconds,
        }
    }
}

impl DeploymentOptions {
    /// Whether instances run on blocking worker threads, either through the
    /// `worker` flag or the [`ThreadingModel::Worker`] model.
    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.worker || self.threading_model == ThreadingModel::Worker
    }

    /// Sets the worker flag.
    pub fn set_worker(&mut self, worker: bool) -> &mut Self {
        self.worker = worker;
        self
    }

    /// Number of instances to start, always at least one.
    #[must_use]
    pub fn instances(&self) -> u32 {
        u32::try_from(self.instances).unwrap_or(1)
    }

    /// Sets the instance count; must be positive.
    pub fn set_instances(&mut self, instances: i32) -> Result<&mut Self, SetterError> {
        self.instances = positive("instances", instances)?;
        Ok(self)
    }

    /// Configuration handed to every workload instance.
    #[must_use]
    pub fn config(&self) -> &JsonObject {
        &self.config
    }

    /// Replaces the workload configuration.
    pub fn set_config(&mut self, config: JsonObject) -> &mut Self {
        self.config = config;
        self
    }

    /// Named worker pool shared by deployments using the same name.
    #[must_use]
    pub fn worker_pool_name(&self) -> Option<&str> {
        self.worker_pool_name.as_deref()
    }

    /// Names the worker pool.
    pub fn set_worker_pool_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.worker_pool_name = Some(name.into());
        self
    }

    /// Concurrency limit of the named worker pool.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        usize::try_from(self.worker_pool_size).unwrap_or(1)
    }

    /// Sets the worker pool limit; must be positive.
    pub fn set_worker_pool_size(&mut self, size: i32) -> Result<&mut Self, SetterError> {
        self.worker_pool_size = positive("workerPoolSize", size)?;
        Ok(self)
    }

    /// Whether the deployment should fail over to another cluster member.
    #[must_use]
    pub fn ha(&self) -> bool {
        self.ha
    }

    /// Enables or disables failover for this deployment.
    pub fn set_ha(&mut self, ha: bool) -> &mut Self {
        self.ha = ha;
        self
    }

    /// Where instances execute.
    #[must_use]
    pub fn threading_model(&self) -> ThreadingModel {
        self.threading_model
    }

    /// Sets the threading model.
    pub fn set_threading_model(&mut self, model: ThreadingModel) -> &mut Self {
        self.threading_model = model;
        self
    }

    /// Longest a worker instance may spend starting before a warning is logged.
    #[must_use]
    pub fn max_worker_execute_time(&self) -> Duration {
        self.max_worker_execute_time_unit
            .to_duration(self.max_worker_execute_time)
    }

    /// Sets the worker start limit; must be positive.
    pub fn set_max_worker_execute_time(&mut self, amount: i64) -> Result<&mut Self, SetterError> {
        self.max_worker_execute_time = positive_long("maxWorkerExecuteTime", amount)?;
        Ok(self)
    }

    /// Sets the unit of the worker start limit.
    pub fn set_max_worker_execute_time_unit(&mut self, unit: TimeUnit) -> &mut Self {
        self.max_worker_execute_time_unit = unit;
        self
    }

    /// Re-checks values that bypassed the setters during deserialisation.
    pub fn validate(&self) -> Result<(), SetterError> {
        positive("instances", self.instances)?;
        positive("workerPoolSize", self.worker_pool_size)?;
        positive_long("maxWorkerExecuteTime", self.max_worker_execute_time)?;
        Ok(())
    }
}

static BINDINGS: Lazy<PropertyRegistry<DeploymentOptions>> = Lazy::new(|| {
    PropertyRegistry::new("deployment", DEPLOYMENT_OPTIONS_PREFIX)
        .bind(Binding::boolean("worker", |options: &mut DeploymentOptions, value| {
            options.set_worker(value);
            Ok(())
        }))
        .bind(Binding::int("instances", |options: &mut DeploymentOptions, value| {
            options.set_instances(value).map(drop)
        }))
        .bind(Binding::string(
            "workerPoolName",
            |options: &mut DeploymentOptions, value| {
                options.set_worker_pool_name(value);
                Ok(())
            },
        ))
        .bind(Binding::int(
            "workerPoolSize",
            |options: &mut DeploymentOptions, value| options.set_worker_pool_size(value).map(drop),
        ))
        .bind(Binding::boolean("ha", |options: &mut DeploymentOptions, value| {
            options.set_ha(value);
            Ok(())
        }))
        .bind(Binding::enumeration::<ThreadingModel, _>(
            "threadingModel",
            "ThreadingModel",
            |options: &mut DeploymentOptions, value| {
                options.set_threading_model(value);
                Ok(())
            },
        ))
        .bind(Binding::long(
            "maxWorkerExecuteTime",
            |options: &mut DeploymentOptions, value| {
                options.set_max_worker_execute_time(value).map(drop)
            },
        ))
        .bind(Binding::enumeration::<TimeUnit, _>(
            "maxWorkerExecuteTimeUnit",
            "TimeUnit",
            |options: &mut DeploymentOptions, value| {
                options.set_max_worker_execute_time_unit(value);
                Ok(())
            },
        ))
});

/// Property bindings for `liftoff.deployment.options.*`.
#[must_use]
pub fn deployment_bindings() -> &'static PropertyRegistry<DeploymentOptions> {
    &BINDINGS
}
