use liftoff_config::RuntimeOptions;

use crate::wait::Completion;

/// Membership in a cluster of runtimes.
///
/// The engine joins before reporting a clustered runtime as started and
/// leaves while closing. Both operations may take arbitrarily long; the
/// launcher bounds them with its own deadlines.
pub trait ClusterManager: Send + Sync {
    /// Joins the cluster described by the event bus and HA settings in
    /// `options`.
    fn join(&self, options: &RuntimeOptions) -> Completion<()>;

    /// Leaves the cluster.
    fn leave(&self) -> Completion<()>;
}
