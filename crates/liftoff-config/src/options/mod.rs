//! Typed option groups and their property-binding registries.
//!
//! Fields are private; setters validate their input so that both JSON
//! documents (via [`validate`](RuntimeOptions::validate)) and property
//! overrides end in the same checked state.

mod deployment;
mod event_bus;
mod metrics;
mod runtime;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

pub use deployment::{DeploymentOptions, ThreadingModel, deployment_bindings};
pub use event_bus::{EventBusOptions, event_bus_bindings};
pub use metrics::{MetricsOptions, metrics_bindings};
pub use runtime::{RuntimeOptions, runtime_bindings};

/// A setter rejected the value it was given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct SetterError {
    field: &'static str,
    reason: String,
}

impl SetterError {
    /// Creates a rejection for `field`.
    #[must_use]
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// Field whose setter rejected the value.
    #[must_use]
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Human-readable rejection reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Unit qualifying an execute-time limit.
///
/// Variant names are matched exactly when bound from properties, so
/// `MILLISECONDS` is accepted and `milliseconds` is not.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    /// Billionths of a second.
    #[default]
    Nanoseconds,
    /// Millionths of a second.
    Microseconds,
    /// Thousandths of a second.
    Milliseconds,
    /// Whole seconds.
    Seconds,
    /// Sixty seconds.
    Minutes,
    /// Sixty minutes.
    Hours,
    /// Twenty-four hours.
    Days,
}

impl TimeUnit {
    /// Converts `amount` of this unit into a [`Duration`], saturating on
    /// overflow and treating negative amounts as zero.
    #[must_use]
    pub fn to_duration(self, amount: i64) -> Duration {
        let count = u64::try_from(amount).unwrap_or(0);
        match self {
            Self::Nanoseconds => Duration::from_nanos(count),
            Self::Microseconds => Duration::from_micros(count),
            Self::Milliseconds => Duration::from_millis(count),
            Self::Seconds => Duration::from_secs(count),
            Self::Minutes => Duration::from_secs(count.saturating_mul(60)),
            Self::Hours => Duration::from_secs(count.saturating_mul(3_600)),
            Self::Days => Duration::from_secs(count.saturating_mul(86_400)),
        }
    }
}

pub(crate) fn positive(field: &'static str, value: i32) -> Result<i32, SetterError> {
    if value < 1 {
        return Err(SetterError::new(field, format!("must be at least 1, got {value}")));
    }
    Ok(value)
}

pub(crate) fn positive_long(field: &'static str, value: i64) -> Result<i64, SetterError> {
    if value < 1 {
        return Err(SetterError::new(field, format!("must be at least 1, got {value}")));
    }
    Ok(value)
}

pub(crate) fn non_negative_long(field: &'static str, value: i64) -> Result<i64, SetterError> {
    if value < 0 {
        return Err(SetterError::new(field, format!("must not be negative, got {value}")));
    }
    Ok(value)
}

pub(crate) fn port(field: &'static str, value: i32) -> Result<u16, SetterError> {
    u16::try_from(value)
        .map_err(|_| SetterError::new(field, format!("port {value} is outside 0..=65535")))
}
