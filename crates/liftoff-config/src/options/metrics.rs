use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{SetterError, positive_long};
use crate::binding::{Binding, PropertyRegistry};
use crate::resolver::METRICS_OPTIONS_PREFIX;

const DEFAULT_REPORT_INTERVAL_MS: i64 = 5_000;

/// Runtime metrics reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsOptions {
    enabled: bool,
    report_interval: i64,
    registry_name: Option<String>,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            report_interval: DEFAULT_REPORT_INTERVAL_MS,
            registry_name: None,
        }
    }
}

impl MetricsOptions {
    /// Whether metrics are reported.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables reporting.
    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }

    /// Interval between metric reports.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.report_interval).unwrap_or(0))
    }

    /// Sets the report interval in milliseconds; must be positive.
    pub fn set_report_interval(&mut self, millis: i64) -> Result<&mut Self, SetterError> {
        self.report_interval = positive_long("reportInterval", millis)?;
        Ok(self)
    }

    /// Name attached to every report, if any.
    #[must_use]
    pub fn registry_name(&self) -> Option<&str> {
        self.registry_name.as_deref()
    }

    /// Names the registry reports are attached to.
    pub fn set_registry_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.registry_name = Some(name.into());
        self
    }

    /// Re-checks values that bypassed the setters during deserialisation.
    pub fn validate(&self) -> Result<(), SetterError> {
        positive_long("reportInterval", self.report_interval).map(drop)
    }
}

static BINDINGS: Lazy<PropertyRegistry<MetricsOptions>> = Lazy::new(|| {
    PropertyRegistry::new("metrics", METRICS_OPTIONS_PREFIX)
        .bind(Binding::boolean("enabled", |options: &mut MetricsOptions, value| {
            options.set_enabled(value);
            Ok(())
        }))
        .bind(Binding::long(
            "reportInterval",
            |options: &mut MetricsOptions, value| options.set_report_interval(value).map(drop),
        ))
        .bind(Binding::string(
            "registryName",
            |options: &mut MetricsOptions, value| {
                options.set_registry_name(value);
                Ok(())
            },
        ))
});

/// Property bindings for `liftoff.metrics.options.*`.
#[must_use]
pub fn metrics_bindings() -> &'static PropertyRegistry<MetricsOptions> {
    &BINDINGS
}
