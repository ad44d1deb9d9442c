use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{EventBusOptions, MetricsOptions, SetterError, TimeUnit, positive, positive_long};
use crate::binding::{Binding, PropertyRegistry};
use crate::resolver::RUNTIME_OPTIONS_PREFIX;

const DEFAULT_WORKER_POOL_SIZE: i32 = 20;
const DEFAULT_BLOCKED_THREAD_CHECK_INTERVAL_MS: i64 = 1_000;
const DEFAULT_MAX_EVENT_LOOP_EXECUTE_TIME_NS: i64 = 2_000_000_000;
const DEFAULT_MAX_WORKER_EXECUTE_TIME_NS: i64 = 60_000_000_000;
const DEFAULT_HA_GROUP: &str = "__DEFAULT__";
const DEFAULT_THREAD_NAME_PREFIX: &str = "liftoff";

fn default_event_loop_pool_size() -> i32 {
    let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    i32::try_from(cores.saturating_mul(2)).unwrap_or(i32::MAX)
}

/// Settings used to build and start the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeOptions {
    event_loop_pool_size: i32,
    worker_pool_size: i32,
    blocked_thread_check_interval: i64,
    max_event_loop_execute_time: i64,
    max_event_loop_execute_time_unit: TimeUnit,
    max_worker_execute_time: i64,
    max_worker_execute_time_unit: TimeUnit,
    ha_enabled: bool,
    ha_group: String,
    quorum_size: i32,
    thread_name_prefix: String,
    event_bus_options: EventBusOptions,
    metrics_options: MetricsOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            event_loop_pool_size: default_event_loop_pool_size(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            blocked_thread_check_interval: DEFAULT_BLOCKED_THREAD_CHECK_INTERVAL_MS,
            max_event_loop_execute_time: DEFAULT_MAX_EVENT_LOOP_EXECUTE_TIME_NS,
            max_event_loop_execute_time_unit: TimeUnit::Nanoseconds,
            max_worker_execute_time: DEFAULT_MAX_WORKER_EXECUTE_TIME_NS,
            max_worker_execute_time_unit: TimeUnit::Nanoseconds,
            ha_enabled: false,
            ha_group: DEFAULT_HA_GROUP.to_owned(),
            quorum_size: 1,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            event_bus_options: EventBusOptions::default(),
            metrics_options: MetricsOptions::default(),
        }
    }
}

impl RuntimeOptions {
    /// Number of event loop (async worker) threads.
    #[must_use]
    pub fn event_loop_pool_size(&self) -> usize {
        usize::try_from(self.event_loop_pool_size).unwrap_or(1)
    }

    /// Sets the event loop thread count; must be positive.
    pub fn set_event_loop_pool_size(&mut self, size: i32) -> Result<&mut Self, SetterError> {
        self.event_loop_pool_size = positive("eventLoopPoolSize", size)?;
        Ok(self)
    }

    /// Upper bound on blocking worker threads.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        usize::try_from(self.worker_pool_size).unwrap_or(1)
    }

    /// Sets the blocking thread bound; must be positive.
    pub fn set_worker_pool_size(&mut self, size: i32) -> Result<&mut Self, SetterError> {
        self.worker_pool_size = positive("workerPoolSize", size)?;
        Ok(self)
    }

    /// How often in-flight workload starts are checked against their limits.
    #[must_use]
    pub fn blocked_thread_check_interval(&self) -> Duration {
        TimeUnit::Milliseconds.to_duration(self.blocked_thread_check_interval)
    }

    /// Sets the check interval in milliseconds; must be positive.
    pub fn set_blocked_thread_check_interval(&mut self, millis: i64) -> Result<&mut Self, SetterError> {
        self.blocked_thread_check_interval = positive_long("blockedThreadCheckInterval", millis)?;
        Ok(self)
    }

    /// Longest an event loop instance may spend starting before a warning.
    #[must_use]
    pub fn max_event_loop_execute_time(&self) -> Duration {
        self.max_event_loop_execute_time_unit
            .to_duration(self.max_event_loop_execute_time)
    }

    /// Sets the event loop start limit, in units of
    /// [`Self::set_max_event_loop_execute_time_unit`]; must be positive.
    pub fn set_max_event_loop_execute_time(&mut self, amount: i64) -> Result<&mut Self, SetterError> {
        self.max_event_loop_execute_time = positive_long("maxEventLoopExecuteTime", amount)?;
        Ok(self)
    }

    /// Sets the unit of the event loop start limit.
    pub fn set_max_event_loop_execute_time_unit(&mut self, unit: TimeUnit) -> &mut Self {
        self.max_event_loop_execute_time_unit = unit;
        self
    }

    /// Longest a worker instance may spend starting before a warning.
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

    /// Whether deployments may fail over to other cluster members.
    #[must_use]
    pub fn ha_enabled(&self) -> bool {
        self.ha_enabled
    }

    /// Enables or disables HA failover.
    pub fn set_ha_enabled(&mut self, enabled: bool) -> &mut Self {
        self.ha_enabled = enabled;
        self
    }

    /// HA group this runtime joins.
    #[must_use]
    pub fn ha_group(&self) -> &str {
        &self.ha_group
    }

    /// Sets the HA group.
    pub fn set_ha_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.ha_group = group.into();
        self
    }

    /// Members required before HA deployments are considered.
    #[must_use]
    pub fn quorum_size(&self) -> u32 {
        u32::try_from(self.quorum_size).unwrap_or(1)
    }

    /// Sets the HA quorum; must be positive.
    pub fn set_quorum_size(&mut self, size: i32) -> Result<&mut Self, SetterError> {
        self.quorum_size = positive("quorumSize", size)?;
        Ok(self)
    }

    /// Prefix for the names of runtime threads.
    #[must_use]
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// Sets the thread name prefix; must not be blank.
    pub fn set_thread_name_prefix(&mut self, prefix: impl Into<String>) -> Result<&mut Self, SetterError> {
        let candidate = prefix.into();
        if candidate.trim().is_empty() {
            return Err(SetterError::new("threadNamePrefix", "must not be blank"));
        }
        self.thread_name_prefix = candidate;
        Ok(self)
    }

    /// Cluster transport settings.
    #[must_use]
    pub fn event_bus_options(&self) -> &EventBusOptions {
        &self.event_bus_options
    }

    /// Mutable access to the cluster transport settings.
    pub fn event_bus_options_mut(&mut self) -> &mut EventBusOptions {
        &mut self.event_bus_options
    }

    /// Metrics settings.
    #[must_use]
    pub fn metrics_options(&self) -> &MetricsOptions {
        &self.metrics_options
    }

    /// Mutable access to the metrics settings.
    pub fn metrics_options_mut(&mut self) -> &mut MetricsOptions {
        &mut self.metrics_options
    }

    /// Re-checks values that bypassed the setters during deserialisation,
    /// including the nested groups.
    pub fn validate(&self) -> Result<(), SetterError> {
        positive("eventLoopPoolSize", self.event_loop_pool_size)?;
        positive("workerPoolSize", self.worker_pool_size)?;
        positive_long("blockedThreadCheckInterval", self.blocked_thread_check_interval)?;
        positive_long("maxEventLoopExecuteTime", self.max_event_loop_execute_time)?;
        positive_long("maxWorkerExecuteTime", self.max_worker_execute_time)?;
        positive("quorumSize", self.quorum_size)?;
        if self.thread_name_prefix.trim().is_empty() {
            return Err(SetterError::new("threadNamePrefix", "must not be blank"));
        }
        self.event_bus_options.validate()?;
        self.metrics_options.validate()
    }
}

static BINDINGS: Lazy<PropertyRegistry<RuntimeOptions>> = Lazy::new(|| {
    PropertyRegistry::new("runtime", RUNTIME_OPTIONS_PREFIX)
        .bind(Binding::int(
            "eventLoopPoolSize",
            |options: &mut RuntimeOptions, value| options.set_event_loop_pool_size(value).map(drop),
        ))
        .bind(Binding::int(
            "workerPoolSize",
            |options: &mut RuntimeOptions, value| options.set_worker_pool_size(value).map(drop),
        ))
        .bind(Binding::long(
            "blockedThreadCheckInterval",
            |options: &mut RuntimeOptions, value| {
                options.set_blocked_thread_check_interval(value).map(drop)
            },
        ))
        .bind(Binding::long(
            "maxEventLoopExecuteTime",
            |options: &mut RuntimeOptions, value| {
                options.set_max_event_loop_execute_time(value).map(drop)
            },
        ))
        .bind(Binding::enumeration::<TimeUnit, _>(
            "maxEventLoopExecuteTimeUnit",
            "TimeUnit",
            |options: &mut RuntimeOptions, value| {
                options.set_max_event_loop_execute_time_unit(value);
                Ok(())
            },
        ))
        .bind(Binding::long(
            "maxWorkerExecuteTime",
            |options: &mut RuntimeOptions, value| options.set_max_worker_execute_time(value).map(drop),
        ))
        .bind(Binding::enumeration::<TimeUnit, _>(
            "maxWorkerExecuteTimeUnit",
            "TimeUnit",
            |options: &mut RuntimeOptions, value| {
                options.set_max_worker_execute_time_unit(value);
                Ok(())
            },
        ))
        .bind(Binding::boolean("haEnabled", |options: &mut RuntimeOptions, value| {
            options.set_ha_enabled(value);
            Ok(())
        }))
        .bind(Binding::string("haGroup", |options: &mut RuntimeOptions, value| {
            options.set_ha_group(value);
            Ok(())
        }))
        .bind(Binding::int("quorumSize", |options: &mut RuntimeOptions, value| {
            options.set_quorum_size(value).map(drop)
        }))
        .bind(Binding::string(
            "threadNamePrefix",
            |options: &mut RuntimeOptions, value| options.set_thread_name_prefix(value).map(drop),
        ))
});

/// Property bindings for `liftoff.options.*`.
#[must_use]
pub fn runtime_bindings() -> &'static PropertyRegistry<RuntimeOptions> {
    &BINDINGS
}
