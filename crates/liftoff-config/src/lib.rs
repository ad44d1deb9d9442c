//! Configuration model shared by the liftoff launcher.
//!
//! Options for each group (runtime, event bus, deployment, metrics) are
//! resolved by layering, in order:
//!
//! 1. compiled defaults,
//! 2. a JSON document given inline or as a file path,
//! 3. scalar command-line overrides for a handful of well-known fields,
//! 4. process properties carrying a group-specific prefix.
//!
//! Property overrides are bound through an explicit [`PropertyRegistry`] per
//! group rather than by introspection. Unknown keys and values that cannot be
//! coerced are logged and skipped; a setter rejecting a coerced value is the
//! only fatal outcome and surfaces as [`OverrideError`].

mod args;
mod binding;
mod json;
mod logging;
mod options;
mod properties;
mod resolver;

pub use args::LaunchArgs;
pub use binding::{
    BindError, Binding, OverrideError, OverrideReport, PropertyRegistry, SkipReason,
    SkippedOverride, ValueKind,
};
pub use json::{JsonObject, read_json_file_or_string};
pub use logging::{DEFAULT_LOG_FILTER, LogFormat, LogFormatParseError};
pub use options::{
    DeploymentOptions, EventBusOptions, MetricsOptions, RuntimeOptions, SetterError,
    ThreadingModel, TimeUnit, deployment_bindings, event_bus_bindings, metrics_bindings,
    runtime_bindings,
};
pub use properties::{ProcessEnvironment, PropertySource, StaticProperties};
pub use resolver::{
    ConfigError, ConfigResolver, DEPLOYMENT_OPTIONS_PREFIX, EVENT_BUS_OPTIONS_PREFIX,
    METRICS_OPTIONS_PREFIX, RUNTIME_OPTIONS_PREFIX,
};

/// Tracing target used for configuration diagnostics.
pub const CONFIG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::overrides");
