use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::workload::{Workload, WorkloadFactory};

/// Namespace used for names that carry no `factory:` prefix.
pub const DEFAULT_NAMESPACE: &str = "local";

/// Named workload factories, grouped by namespace.
///
/// Names are written `namespace:name`; a bare `name` lives in
/// [`DEFAULT_NAMESPACE`].
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    factories: BTreeMap<(String, String), WorkloadFactory>,
}

fn split(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or((DEFAULT_NAMESPACE, name))
}

impl WorkloadRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: &str, factory: WorkloadFactory) -> &mut Self {
        let (namespace, local) = split(name);
        self.factories
            .insert((namespace.to_owned(), local.to_owned()), factory);
        self
    }

    /// Registers a workload type built by `constructor`.
    #[must_use]
    pub fn with<W, F>(mut self, name: &str, constructor: F) -> Self
    where
        W: Workload + 'static,
        F: Fn() -> W + Send + Sync + 'static,
    {
        let factory: WorkloadFactory = Arc::new(move || Box::new(constructor()) as Box<dyn Workload>);
        self.register(name, factory);
        self
    }

    /// Looks up the factory for `name`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<WorkloadFactory> {
        let (namespace, local) = split(name);
        self.factories
            .get(&(namespace.to_owned(), local.to_owned()))
            .cloned()
    }

    /// Fully qualified names of every registration, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories
            .keys()
            .map(|(namespace, local)| format!("{namespace}:{local}"))
            .collect()
    }
}

impl fmt::Debug for WorkloadRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkloadRegistry")
            .field("names", &self.names())
            .finish()
    }
}
