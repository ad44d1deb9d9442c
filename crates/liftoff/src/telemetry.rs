//! Log output for launched applications.
//!
//! The subscriber is process-global and installed on the first launch only;
//! later launches in the same process reuse it.

use std::env;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use liftoff_config::{LaunchArgs, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Environment variable whose filter, when set, replaces `--log-filter`.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Proof that log output is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors raised while installing log output.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives did not parse.
    #[error("log filter '{directives}' is invalid: {reason}")]
    Filter {
        /// Directives as given.
        directives: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was installed outside the launcher.
    #[error("another log subscriber is already installed")]
    Subscriber {
        /// Rejection from `tracing`.
        #[source]
        source: SetGlobalDefaultError,
    },
}

/// Installs the log subscriber described by `args` unless one was installed
/// by an earlier launch.
pub fn initialise(args: &LaunchArgs) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(&filter_directives(args), args.log_format))
        .map(|_| TelemetryHandle)
}

fn filter_directives(args: &LaunchArgs) -> String {
    match env::var(LOG_FILTER_ENV) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => args.log_filter.clone(),
    }
}

fn subscriber(filter: EnvFilter, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let stderr_is_terminal = io::stderr().is_terminal();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(stderr_is_terminal)
        .with_thread_names(true)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}

fn install(directives: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter {
        directives: directives.to_owned(),
        reason: error.to_string(),
    })?;
    tracing::subscriber::set_global_default(subscriber(filter, format))
        .map_err(|source| TelemetryError::Subscriber { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filters_are_reported() {
        let error = install("liftoff=loudest", LogFormat::Compact)
            .expect_err("filter should be rejected");
        assert!(matches!(error, TelemetryError::Filter { ref directives, .. } if directives == "liftoff=loudest"));
    }
}
