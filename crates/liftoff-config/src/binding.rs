//! Explicit string-keyed bindings onto typed option fields.
//!
//! Every option group declares a [`PropertyRegistry`] once. Each [`Binding`]
//! pairs a field name with the scalar kind it accepts and a typed setter, so
//! applying `liftoff.deployment.options.instances=3` becomes a case-insensitive
//! name lookup, a coercion of `"3"` to `i32`, and a call to the setter.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::CONFIG_TARGET;
use crate::options::SetterError;
use crate::properties::PropertySource;

/// Scalar kinds a binding can coerce a property value into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Taken verbatim.
    String,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// `true` in any letter case, everything else `false`.
    Boolean,
    /// Exact variant name of the named enumeration.
    Enum(&'static str),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => formatter.write_str("string"),
            Self::Int => formatter.write_str("int"),
            Self::Long => formatter.write_str("long"),
            Self::Boolean => formatter.write_str("boolean"),
            Self::Enum(name) => write!(formatter, "enum {name}"),
        }
    }
}

/// Failure to apply a single property value through a binding.
#[derive(Debug, Error)]
pub enum BindError {
    /// The raw value could not be converted to the expected kind.
    #[error("cannot convert '{value}' to {kind}")]
    Coercion {
        /// Kind the binding expects.
        kind: ValueKind,
        /// Raw property value.
        value: String,
    },
    /// The setter rejected the converted value.
    #[error(transparent)]
    Setter(#[from] SetterError),
}

type Apply<T> = Box<dyn Fn(&mut T, &str) -> Result<(), BindError> + Send + Sync>;

/// A named, typed setter on an option group.
pub struct Binding<T> {
    name: &'static str,
    kind: ValueKind,
    apply: Apply<T>,
}

impl<T: 'static> Binding<T> {
    fn new<V, C, S>(name: &'static str, kind: ValueKind, coerce: C, setter: S) -> Self
    where
        C: Fn(&str) -> Option<V> + Send + Sync + 'static,
        S: Fn(&mut T, V) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        let apply = move |target: &mut T, raw: &str| {
            let value = coerce(raw).ok_or_else(|| BindError::Coercion {
                kind,
                value: raw.to_owned(),
            })?;
            setter(target, value).map_err(BindError::from)
        };
        Self {
            name,
            kind,
            apply: Box::new(apply),
        }
    }

    /// Binds a string-valued field.
    pub fn string<S>(name: &'static str, setter: S) -> Self
    where
        S: Fn(&mut T, String) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        Self::new(name, ValueKind::String, |raw| Some(raw.to_owned()), setter)
    }

    /// Binds an `i32` field.
    pub fn int<S>(name: &'static str, setter: S) -> Self
    where
        S: Fn(&mut T, i32) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        Self::new(name, ValueKind::Int, |raw| raw.parse().ok(), setter)
    }

    /// Binds an `i64` field.
    pub fn long<S>(name: &'static str, setter: S) -> Self
    where
        S: Fn(&mut T, i64) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        Self::new(name, ValueKind::Long, |raw| raw.parse().ok(), setter)
    }

    /// Binds a boolean field. Only `true` (any case) reads as true.
    pub fn boolean<S>(name: &'static str, setter: S) -> Self
    where
        S: Fn(&mut T, bool) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            ValueKind::Boolean,
            |raw| Some(raw.eq_ignore_ascii_case("true")),
            setter,
        )
    }

    /// Binds an enumeration field parsed by exact variant name.
    pub fn enumeration<E, S>(name: &'static str, type_name: &'static str, setter: S) -> Self
    where
        E: FromStr + 'static,
        S: Fn(&mut T, E) -> Result<(), SetterError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            ValueKind::Enum(type_name),
            |raw| raw.parse::<E>().ok(),
            setter,
        )
    }
}

impl<T> Binding<T> {
    /// Field name as declared.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Kind the binding coerces values into.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Applies a raw property value to `target`.
    pub fn apply(&self, target: &mut T, raw: &str) -> Result<(), BindError> {
        (self.apply)(target, raw)
    }
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Binding")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A setter that was found and rejected its value.
///
/// Unlike unknown keys or unparsable values, this aborts resolution.
#[derive(Debug, Error)]
#[error("failed to apply property '{key}' to {group} options: {source}")]
pub struct OverrideError {
    /// Full property key.
    pub key: String,
    /// Option group the key targeted.
    pub group: &'static str,
    /// Rejection reported by the setter.
    #[source]
    pub source: SetterError,
}

/// Why an override was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No field matched the key suffix.
    UnknownField,
    /// The value could not be converted to the field's kind.
    InvalidValue(ValueKind),
}

/// An override that was skipped with a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOverride {
    /// Full property key.
    pub key: String,
    /// Reason the override was not applied.
    pub reason: SkipReason,
}

/// Summary of an override pass over one option group.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OverrideReport {
    /// Keys whose values were applied, in application order.
    pub applied: Vec<String>,
    /// Keys that were skipped with a warning.
    pub skipped: Vec<SkippedOverride>,
}

/// Declared bindings for one option group, keyed under a fixed prefix.
pub struct PropertyRegistry<T> {
    group: &'static str,
    prefix: &'static str,
    bindings: Vec<Binding<T>>,
}

impl<T> PropertyRegistry<T> {
    /// Creates an empty registry for `group` keyed under `prefix`.
    #[must_use]
    pub fn new(group: &'static str, prefix: &'static str) -> Self {
        Self {
            group,
            prefix,
            bindings: Vec::new(),
        }
    }

    /// Appends a binding. Earlier bindings win on case-insensitive clashes.
    #[must_use]
    pub fn bind(mut self, binding: Binding<T>) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Option group name used in diagnostics.
    #[must_use]
    pub fn group(&self) -> &'static str {
        self.group
    }

    /// Property prefix, including the trailing dot.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Finds the first binding whose name matches `field` ignoring ASCII case.
    #[must_use]
    pub fn find(&self, field: &str) -> Option<&Binding<T>> {
        self.bindings
            .iter()
            .find(|binding| binding.name.eq_ignore_ascii_case(field))
    }

    /// Applies every property carrying this registry's prefix to `target`.
    ///
    /// Unknown fields and unconvertible values are logged and skipped. The
    /// first setter rejection aborts the pass.
    pub fn apply(
        &self,
        target: &mut T,
        source: &dyn PropertySource,
    ) -> Result<OverrideReport, OverrideError> {
        let mut report = OverrideReport::default();
        for (key, value) in source.properties() {
            let Some(field) = key.strip_prefix(self.prefix) else {
                continue;
            };
            let Some(binding) = self.find(field) else {
                warn!(
                    target: CONFIG_TARGET,
                    key = %key,
                    group = self.group,
                    "no such property to configure on {} options: {field}",
                    self.group
                );
                report.skipped.push(SkippedOverride {
                    key,
                    reason: SkipReason::UnknownField,
                });
                continue;
            };
            match binding.apply(target, &value) {
                Ok(()) => {
                    debug!(target: CONFIG_TARGET, key = %key, group = self.group, "applied override");
                    report.applied.push(key);
                }
                Err(BindError::Coercion { kind, .. }) => {
                    warn!(
                        target: CONFIG_TARGET,
                        key = %key,
                        value = %value,
                        expected = %kind,
                        "invalid value for {} options field {}",
                        self.group,
                        binding.name
                    );
                    report.skipped.push(SkippedOverride {
                        key,
                        reason: SkipReason::InvalidValue(kind),
                    });
                }
                Err(BindError::Setter(source)) => {
                    return Err(OverrideError {
                        key,
                        group: self.group,
                        source,
                    });
                }
            }
        }
        Ok(report)
    }
}

impl<T> fmt::Debug for PropertyRegistry<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PropertyRegistry")
            .field("group", &self.group)
            .field("prefix", &self.prefix)
            .field("bindings", &self.bindings)
            .finish()
    }
}
