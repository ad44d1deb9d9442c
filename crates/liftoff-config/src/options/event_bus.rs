use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{SetterError, non_negative_long, port, positive_long};
use crate::binding::{Binding, PropertyRegistry};
use crate::resolver::EVENT_BUS_OPTIONS_PREFIX;

const DEFAULT_CONNECT_TIMEOUT_MS: i64 = 60_000;
const DEFAULT_CLUSTER_PING_INTERVAL_MS: i64 = 20_000;

/// Cluster transport settings, consulted only when clustering is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventBusOptions {
    host: Option<String>,
    port: u16,
    cluster_public_host: Option<String>,
    cluster_public_port: Option<u16>,
    connect_timeout: i64,
    reconnect_attempts: i32,
    cluster_ping_interval: i64,
}

impl Default for EventBusOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            cluster_public_host: None,
            cluster_public_port: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_attempts: 0,
            cluster_ping_interval: DEFAULT_CLUSTER_PING_INTERVAL_MS,
        }
    }
}

impl EventBusOptions {
    /// Host to bind for cluster traffic; `None` lets the cluster manager pick.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Sets the cluster bind host.
    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = Some(host.into());
        self
    }

    /// Port to bind for cluster traffic; `0` selects a spare port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sets the cluster bind port; must fit in `0..=65535`.
    pub fn set_port(&mut self, port_number: i32) -> Result<&mut Self, SetterError> {
        self.port = port("port", port_number)?;
        Ok(self)
    }

    /// Host advertised to other members, defaulting to [`host`](Self::host).
    #[must_use]
    pub fn cluster_public_host(&self) -> Option<&str> {
        self.cluster_public_host.as_deref().or(self.host())
    }

    /// Sets the advertised host.
    pub fn set_cluster_public_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.cluster_public_host = Some(host.into());
        self
    }

    /// Port advertised to other members, defaulting to [`port`](Self::port).
    #[must_use]
    pub fn cluster_public_port(&self) -> u16 {
        self.cluster_public_port.unwrap_or(self.port)
    }

    /// Sets the advertised port; must fit in `0..=65535`.
    pub fn set_cluster_public_port(&mut self, port_number: i32) -> Result<&mut Self, SetterError> {
        self.cluster_public_port = Some(port("clusterPublicPort", port_number)?);
        Ok(self)
    }

    /// Milliseconds allowed for establishing a cluster connection.
    #[must_use]
    pub fn connect_timeout(&self) -> i64 {
        self.connect_timeout
    }

    /// Sets the connect timeout; must be positive.
    pub fn set_connect_timeout(&mut self, millis: i64) -> Result<&mut Self, SetterError> {
        self.connect_timeout = non_negative_long("connectTimeout", millis)?;
        Ok(self)
    }

    /// Reconnection attempts after a lost connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> i32 {
        self.reconnect_attempts
    }

    /// Sets the reconnection attempts; must not be negative.
    pub fn set_reconnect_attempts(&mut self, attempts: i32) -> Result<&mut Self, SetterError> {
        if attempts < 0 {
            return Err(SetterError::new(
                "reconnectAttempts",
                format!("must not be negative, got {attempts}"),
            ));
        }
        self.reconnect_attempts = attempts;
        Ok(self)
    }

    /// Milliseconds between liveness pings to cluster peers.
    #[must_use]
    pub fn cluster_ping_interval(&self) -> i64 {
        self.cluster_ping_interval
    }

    /// Sets the ping interval; must be positive.
    pub fn set_cluster_ping_interval(&mut self, millis: i64) -> Result<&mut Self, SetterError> {
        self.cluster_ping_interval = positive_long("clusterPingInterval", millis)?;
        Ok(self)
    }

    /// Re-checks values that bypassed the setters during deserialisation.
    pub fn validate(&self) -> Result<(), SetterError> {
        non_negative_long("connectTimeout", self.connect_timeout)?;
        positive_long("clusterPingInterval", self.cluster_ping_interval)?;
        if self.reconnect_attempts < 0 {
            return Err(SetterError::new("reconnectAttempts", "must not be negative"));
        }
        Ok(())
    }
}

static BINDINGS: Lazy<PropertyRegistry<EventBusOptions>> = Lazy::new(|| {
    PropertyRegistry::new("event bus", EVENT_BUS_OPTIONS_PREFIX)
        .bind(Binding::string("host", |options: &mut EventBusOptions, value| {
            options.set_host(value);
            Ok(())
        }))
        .bind(Binding::int("port", |options: &mut EventBusOptions, value| {
            options.set_port(value).map(drop)
        }))
        .bind(Binding::string(
            "clusterPublicHost",
            |options: &mut EventBusOptions, value| {
                options.set_cluster_public_host(value);
                Ok(())
            },
        ))
        .bind(Binding::int(
            "clusterPublicPort",
            |options: &mut EventBusOptions, value| options.set_cluster_public_port(value).map(drop),
        ))
        .bind(Binding::long(
            "connectTimeout",
            |options: &mut EventBusOptions, value| options.set_connect_timeout(value).map(drop),
        ))
        .bind(Binding::int(
            "reconnectAttempts",
            |options: &mut EventBusOptions, value| options.set_reconnect_attempts(value).map(drop),
        ))
        .bind(Binding::long(
            "clusterPingInterval",
            |options: &mut EventBusOptions, value| {
                options.set_cluster_ping_interval(value).map(drop)
            },
        ))
});

/// Property bindings for `liftoff.eventBus.options.*`.
#[must_use]
pub fn event_bus_bindings() -> &'static PropertyRegistry<EventBusOptions> {
    &BINDINGS
}
