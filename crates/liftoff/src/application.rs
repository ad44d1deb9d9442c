//! Process-level entry point wiring the launcher together.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tracing::warn;

use liftoff_config::{LaunchArgs, ProcessEnvironment, PropertySource};

use crate::bootstrap::{Collaborators, Deployment, Orchestrator, Timeouts};
use crate::hooks::{DefaultHooks, LifecycleHooks};
use crate::metadata::{ManifestFile, MetadataSource};
use crate::runtime::RuntimeFactory;
use crate::shutdown::{ShutdownSignal, StopOutcome, SystemShutdownSignal};
use crate::telemetry;
use crate::wait::Interrupt;
use crate::BOOTSTRAP_TARGET;

/// Result of [`Application::launch`].
pub enum Launch {
    /// The workload is running. The process should stay up until the
    /// deployment's runtime stops.
    Deployed(Deployment),
    /// The launch ended; the process should exit with this code.
    Exited(u8),
}

/// A launchable application: a runtime factory plus the collaborators that
/// customise a launch.
pub struct Application {
    name: String,
    runtime_factory: Arc<dyn RuntimeFactory>,
    hooks: Arc<dyn LifecycleHooks>,
    metadata: Arc<dyn MetadataSource>,
    properties: Arc<dyn PropertySource>,
    shutdown_signal: Option<Arc<dyn ShutdownSignal>>,
    timeouts: Timeouts,
    interrupt: Interrupt,
}

impl Application {
    /// Creates an application named `name` (the name its manifest is looked
    /// up by) starting runtimes from `runtime_factory`.
    ///
    /// Defaults: no-op hooks apart from closing the runtime after a failed
    /// deployment, manifests discovered beside the executable, overrides read
    /// from the process environment, and termination signals stopping the
    /// runtime.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime_factory: Arc<dyn RuntimeFactory>) -> Self {
        let application = name.into();
        Self {
            metadata: Arc::new(ManifestFile::discover(&application)),
            name: application,
            runtime_factory,
            hooks: Arc::new(DefaultHooks),
            properties: Arc::new(ProcessEnvironment),
            shutdown_signal: Some(Arc::new(SystemShutdownSignal::new())),
            timeouts: Timeouts::default(),
            interrupt: Interrupt::new(),
        }
    }

    /// Replaces the lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the manifest source used to resolve the main workload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replaces the source of `liftoff.options.*` overrides.
    #[must_use]
    pub fn with_properties(mut self, properties: Arc<dyn PropertySource>) -> Self {
        self.properties = properties;
        self
    }

    /// Replaces the external stop trigger; `None` disables it.
    #[must_use]
    pub fn with_shutdown_signal(mut self, signal: Option<Arc<dyn ShutdownSignal>>) -> Self {
        self.shutdown_signal = signal;
        self
    }

    /// Replaces the per-phase timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Interrupts the start and deploy waits of every launch.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Parses `args` and launches, writing usage and argument errors to the
    /// given streams.
    ///
    /// Help and version requests exit 0 and argument errors exit 2. A failed
    /// launch stops the runtime if one was started, prints the usage text to
    /// `stdout` and exits with the code of the phase that failed.
    pub fn launch<I, W, E>(&self, args: I, stdout: &mut W, stderr: &mut E) -> Launch
    where
        I: IntoIterator<Item = OsString>,
        W: Write,
        E: Write,
    {
        let parsed = match LaunchArgs::try_parse_from(args) {
            Ok(parsed) => parsed,
            Err(error) => {
                let rendered = error.render();
                if error.use_stderr() {
                    report_write(write!(stderr, "{rendered}"));
                } else {
                    report_write(write!(stdout, "{rendered}"));
                }
                return Launch::Exited(u8::try_from(error.exit_code()).unwrap_or(2));
            }
        };

        if let Err(error) = telemetry::initialise(&parsed) {
            report_write(writeln!(
                stderr,
                "warning: {error}; continuing without structured logs"
            ));
        }

        let mut orchestrator = Orchestrator::new(Collaborators {
            application: self.name.clone(),
            runtime_factory: Arc::clone(&self.runtime_factory),
            hooks: Arc::clone(&self.hooks),
            metadata: Arc::clone(&self.metadata),
            properties: Arc::clone(&self.properties),
            shutdown_signal: self.shutdown_signal.clone(),
        })
        .with_timeouts(self.timeouts)
        .with_interrupt(self.interrupt.clone());

        match orchestrator.run(&parsed) {
            Ok(deployment) => Launch::Deployed(deployment),
            Err(error) => {
                if let Some(shutdown) = orchestrator.shutdown_coordinator() {
                    shutdown.stop();
                }
                report_write(writeln!(stderr, "{error}"));
                report_write(write!(stdout, "{}", LaunchArgs::command().render_help()));
                Launch::Exited(error.exit_code())
            }
        }
    }

    /// Launches with the process streams and blocks until the deployed
    /// workload's runtime stops.
    #[must_use]
    pub fn run<I>(&self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let launched = self.launch(args, &mut io::stdout(), &mut io::stderr());
        match launched {
            Launch::Exited(code) => ExitCode::from(code),
            Launch::Deployed(deployment) => match deployment.shutdown().wait_for_termination() {
                StopOutcome::Stopped => ExitCode::SUCCESS,
                StopOutcome::TimedOut | StopOutcome::Failed => ExitCode::FAILURE,
            },
        }
    }
}

/// Logs a failed console write; the launch outcome is unaffected.
fn report_write(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(
            target: BOOTSTRAP_TARGET,
            event = "console_write_failed",
            %error,
            "could not write launcher output"
        );
    }
}
