//! Command-line entry point for the liftoff launcher.
//!
//! Starts a tokio-backed runtime, deploys one of the bundled workloads, and
//! keeps running until a termination signal stops the runtime.

mod workloads;

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use liftoff::Application;
use liftoff::engine::TokioRuntimeFactory;

fn main() -> ExitCode {
    let factory = TokioRuntimeFactory::new(workloads::registry());
    Application::new("liftoff", Arc::new(factory)).run(env::args_os())
}
