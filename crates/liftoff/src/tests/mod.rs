//! Test suites for the launcher lifecycle.

mod behaviour;
pub(crate) mod support;
