//! Layers defaults, JSON documents, command-line scalars, and property
//! overrides into the option groups consumed by the launcher.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::CONFIG_TARGET;
use crate::args::LaunchArgs;
use crate::binding::{OverrideError, OverrideReport, PropertyRegistry};
use crate::json::{JsonObject, read_json_file_or_string};
use crate::options::{
    DeploymentOptions, RuntimeOptions, SetterError, deployment_bindings, event_bus_bindings,
    metrics_bindings, runtime_bindings,
};
use crate::properties::PropertySource;

/// Property prefix for runtime options.
pub const RUNTIME_OPTIONS_PREFIX: &str = "liftoff.options.";
/// Property prefix for cluster event bus options.
pub const EVENT_BUS_OPTIONS_PREFIX: &str = "liftoff.eventBus.options.";
/// Property prefix for main workload deployment options.
pub const DEPLOYMENT_OPTIONS_PREFIX: &str = "liftoff.deployment.options.";
/// Property prefix for metrics options.
pub const METRICS_OPTIONS_PREFIX: &str = "liftoff.metrics.options.";

/// Fatal configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A JSON document was an object but did not describe the option group.
    #[error("the {option} document does not describe valid options: {source}")]
    Document {
        /// Option that supplied the document.
        option: &'static str,
        /// Deserialisation error.
        #[source]
        source: serde_json::Error,
    },
    /// A value from a document or command-line flag failed validation.
    #[error("the {option} value is invalid: {source}")]
    Invalid {
        /// Option or flag that supplied the value.
        option: &'static str,
        /// Rejection from the setter.
        #[source]
        source: SetterError,
    },
    /// A property override was rejected by its setter.
    #[error(transparent)]
    Override(#[from] OverrideError),
}

/// Resolves option groups for one launch.
#[derive(Clone, Copy)]
pub struct ConfigResolver<'a> {
    args: &'a LaunchArgs,
    properties: &'a dyn PropertySource,
}

impl<'a> ConfigResolver<'a> {
    /// Creates a resolver over parsed arguments and a property source.
    #[must_use]
    pub fn new(args: &'a LaunchArgs, properties: &'a dyn PropertySource) -> Self {
        Self { args, properties }
    }

    /// Resolves runtime options, including the nested event bus and metrics
    /// groups.
    ///
    /// Cluster flags and event bus properties apply only when clustering was
    /// requested. Runtime properties follow, then metrics properties.
    pub fn resolve_runtime(&self) -> Result<RuntimeOptions, ConfigError> {
        let mut options: RuntimeOptions = self.document("options", self.args.runtime_options.as_deref())?;
        options
            .validate()
            .map_err(|source| ConfigError::Invalid { option: "options", source })?;

        if self.args.cluster {
            let event_bus = options.event_bus_options_mut();
            if let Some(host) = &self.args.cluster_host {
                event_bus.set_host(host.clone());
            }
            if let Some(port) = self.args.cluster_port {
                event_bus
                    .set_port(i32::from(port))
                    .map_err(|source| ConfigError::Invalid { option: "cluster-port", source })?;
            }
            if let Some(host) = &self.args.cluster_public_host {
                event_bus.set_cluster_public_host(host.clone());
            }
            if let Some(port) = self.args.cluster_public_port {
                event_bus
                    .set_cluster_public_port(i32::from(port))
                    .map_err(|source| ConfigError::Invalid {
                        option: "cluster-public-port",
                        source,
                    })?;
            }
            self.overlay(event_bus_bindings(), event_bus)?;
        }

        self.overlay(runtime_bindings(), &mut options)?;
        self.overlay(metrics_bindings(), options.metrics_options_mut())?;
        Ok(options)
    }

    /// Resolves the main workload deployment options.
    ///
    /// `config_parsed` sees the workload configuration after it was read and
    /// before it is attached; edits it makes are kept. Deployment properties
    /// are applied last.
    pub fn resolve_deployment<F>(&self, config_parsed: F) -> Result<DeploymentOptions, ConfigError>
    where
        F: FnOnce(&mut JsonObject),
    {
        let mut options: DeploymentOptions =
            self.document("deployment-options", self.args.deployment_options.as_deref())?;
        options.validate().map_err(|source| ConfigError::Invalid {
            option: "deployment-options",
            source,
        })?;

        if self.args.worker {
            options.set_worker(true);
        }
        if let Some(instances) = self.args.instances {
            options
                .set_instances(instances)
                .map_err(|source| ConfigError::Invalid { option: "instances", source })?;
        }

        let mut config = read_json_file_or_string("conf", self.args.config.as_deref()).unwrap_or_default();
        config_parsed(&mut config);
        options.set_config(config);

        self.overlay(deployment_bindings(), &mut options)?;
        Ok(options)
    }

    fn document<T>(&self, option: &'static str, value: Option<&str>) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        let Some(object) = read_json_file_or_string(option, value) else {
            return Ok(T::default());
        };
        serde_json::from_value(Value::Object(object))
            .map_err(|source| ConfigError::Document { option, source })
    }

    fn overlay<T>(&self, registry: &PropertyRegistry<T>, target: &mut T) -> Result<OverrideReport, ConfigError> {
        let report = registry.apply(target, self.properties)?;
        if !report.applied.is_empty() || !report.skipped.is_empty() {
            debug!(
                target: CONFIG_TARGET,
                group = registry.group(),
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "applied property overrides"
            );
        }
        Ok(report)
    }
}
