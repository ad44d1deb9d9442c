//! Test doubles and the behavioural world for launcher tests.

use std::ffi::OsString;
use std::io::{self, Write};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use strum::Display;

use liftoff_config::{DeploymentOptions, JsonObject, RuntimeOptions, StaticProperties};

use crate::application::{Application, Launch};
use crate::bootstrap::{Deployment, Timeouts};
use crate::context::LifecycleContext;
use crate::hooks::LifecycleHooks;
use crate::metadata::{Attributes, StaticMetadata};
use crate::runtime::{CloseHook, DeploymentTarget, Runtime, RuntimeFactory, RuntimeHandle};
use crate::shutdown::{ShutdownError, ShutdownSignal, StopOutcome};
use crate::wait::{
    Cause, Completion, Failure, Interrupt, Promise, WaitOutcome, await_uninterruptibly, cause,
    pending,
};
use crate::workload::WorkloadFactory;

/// Lifecycle hook invocations observed by [`RecordingHooks`].
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookEvent {
    BeforeStartingRuntime,
    AfterRuntimeStarted,
    AfterFailureToStartRuntime { cause: Option<String> },
    AfterConfigParsed,
    BeforeDeployingWorkload,
    AfterWorkloadDeployed,
    AfterFailureToDeployWorkload { cause: Option<String> },
    BeforeStoppingRuntime,
    AfterRuntimeStopped,
    AfterFailureToStopRuntime { cause: Option<String> },
}

fn describe(cause: Option<&Cause>) -> Option<String> {
    cause.map(ToString::to_string)
}

/// Hooks recording every invocation, with a few scripted behaviours.
///
/// Like the default hooks, a failed deployment closes the runtime unless
/// [`keep_runtime_on_deploy_failure`](Self::keep_runtime_on_deploy_failure)
/// is called.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
    contexts: Mutex<Vec<LifecycleContext>>,
    stop_failure: Mutex<Option<Cause>>,
    factory: Mutex<Option<WorkloadFactory>>,
    instances: Mutex<Option<i32>>,
    config_entry: Mutex<Option<(String, Value)>>,
    keep_runtime: AtomicBool,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().expect("hook events mutex poisoned").clone()
    }

    /// Snapshot handed to the most recent hook taking a context.
    pub fn last_context(&self) -> Option<LifecycleContext> {
        self.contexts
            .lock()
            .expect("hook contexts mutex poisoned")
            .last()
            .cloned()
    }

    pub fn fail_before_stopping(&self, failure: Cause) {
        *self.stop_failure.lock().expect("stop failure mutex poisoned") = Some(failure);
    }

    pub fn supply_factory(&self, factory: WorkloadFactory) {
        *self.factory.lock().expect("factory mutex poisoned") = Some(factory);
    }

    /// Makes the pre-deploy hook set the instance count.
    pub fn amend_instances(&self, instances: i32) {
        *self.instances.lock().expect("instances mutex poisoned") = Some(instances);
    }

    /// Makes the config hook insert `key`.
    pub fn amend_config(&self, key: &str, value: Value) {
        *self.config_entry.lock().expect("config mutex poisoned") = Some((key.to_owned(), value));
    }

    pub fn keep_runtime_on_deploy_failure(&self) {
        self.keep_runtime.store(true, Ordering::SeqCst);
    }

    fn record(&self, event: HookEvent, context: Option<&LifecycleContext>) {
        self.events.lock().expect("hook events mutex poisoned").push(event);
        if let Some(context) = context {
            self.contexts
                .lock()
                .expect("hook contexts mutex poisoned")
                .push(context.clone());
        }
    }
}

impl LifecycleHooks for RecordingHooks {
    fn before_starting_runtime(&self, context: &LifecycleContext, _options: &mut RuntimeOptions) {
        self.record(HookEvent::BeforeStartingRuntime, Some(context));
    }

    fn after_runtime_started(&self, context: &LifecycleContext) {
        self.record(HookEvent::AfterRuntimeStarted, Some(context));
    }

    fn after_failure_to_start_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        self.record(
            HookEvent::AfterFailureToStartRuntime {
                cause: describe(cause),
            },
            Some(context),
        );
    }

    fn after_config_parsed(&self, config: &mut JsonObject) {
        if let Some((key, value)) = self.config_entry.lock().expect("config mutex poisoned").clone() {
            config.insert(key, value);
        }
        self.record(HookEvent::AfterConfigParsed, None);
    }

    fn workload_factory(&self) -> Option<WorkloadFactory> {
        self.factory.lock().expect("factory mutex poisoned").clone()
    }

    fn before_deploying_workload(&self, context: &LifecycleContext, options: &mut DeploymentOptions) {
        if let Some(instances) = *self.instances.lock().expect("instances mutex poisoned") {
            options
                .set_instances(instances)
                .expect("scripted instance count should be valid");
        }
        self.record(HookEvent::BeforeDeployingWorkload, Some(context));
    }

    fn after_workload_deployed(&self, context: &LifecycleContext) {
        self.record(HookEvent::AfterWorkloadDeployed, Some(context));
    }

    fn after_failure_to_deploy_workload(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        self.record(
            HookEvent::AfterFailureToDeployWorkload {
                cause: describe(cause),
            },
            Some(context),
        );
        if !self.keep_runtime.load(Ordering::SeqCst)
            && let Some(runtime) = context.runtime()
        {
            drop(runtime.close());
        }
    }

    fn before_stopping_runtime(&self, context: &LifecycleContext) -> Result<(), Cause> {
        self.record(HookEvent::BeforeStoppingRuntime, Some(context));
        match self.stop_failure.lock().expect("stop failure mutex poisoned").clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn after_runtime_stopped(&self, context: &LifecycleContext) {
        self.record(HookEvent::AfterRuntimeStopped, Some(context));
    }

    fn after_failure_to_stop_runtime(&self, context: &LifecycleContext, cause: Option<&Cause>) {
        self.record(
            HookEvent::AfterFailureToStopRuntime {
                cause: describe(cause),
            },
            Some(context),
        );
    }
}

/// How a scripted asynchronous operation ends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scripted {
    #[default]
    Succeed,
    Fail(String),
    /// Never settles.
    Hang,
}

impl Scripted {
    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_owned())
    }
}

/// Runtime that does nothing, for tests that only need a handle.
pub struct InertRuntime;

impl InertRuntime {
    pub fn handle() -> RuntimeHandle {
        Arc::new(Self)
    }
}

impl Runtime for InertRuntime {
    fn add_close_hook(&self, _hook: CloseHook) {}

    fn close(&self) -> Completion<()> {
        Completion::succeeded(())
    }

    fn deploy(&self, _target: DeploymentTarget, _options: DeploymentOptions) -> Completion<String> {
        Completion::failed(cause(Failure::new("inert runtime cannot deploy")))
    }

    fn is_clustered(&self) -> bool {
        false
    }
}

enum CloseProgress {
    Open,
    Closing(Vec<Promise<()>>),
    Closed(Result<(), Cause>),
}

/// Runtime whose deploy and close outcomes are scripted.
///
/// `close` runs the registered close hooks on the calling thread, so a close
/// requested from within a hook observes the close already in progress.
pub struct ScriptedRuntime {
    deploy_script: Mutex<Scripted>,
    close_script: Mutex<Scripted>,
    hooks: Mutex<Vec<CloseHook>>,
    progress: Mutex<CloseProgress>,
    deployments: Mutex<Vec<(String, DeploymentOptions)>>,
    parked: Mutex<Vec<Promise<String>>>,
    close_calls: AtomicUsize,
    hooks_before_hang: AtomicBool,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            deploy_script: Mutex::new(Scripted::Succeed),
            close_script: Mutex::new(Scripted::Succeed),
            hooks: Mutex::new(Vec::new()),
            progress: Mutex::new(CloseProgress::Open),
            deployments: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            hooks_before_hang: AtomicBool::new(false),
        }
    }

    /// Close never settles and never runs the close hooks.
    pub fn with_hanging_close(self) -> Self {
        self.script_close(Scripted::Hang);
        self
    }

    /// Close runs the close hooks and then never settles.
    pub fn with_stuck_close(self) -> Self {
        self.script_close(Scripted::Hang);
        self.hooks_before_hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_failing_close(self, message: &str) -> Self {
        self.script_close(Scripted::fail(message));
        self
    }

    pub fn script_deploy(&self, script: Scripted) {
        *self.deploy_script.lock().expect("deploy script mutex poisoned") = script;
    }

    pub fn script_close(&self, script: Scripted) {
        *self.close_script.lock().expect("close script mutex poisoned") = script;
    }

    /// Deployment targets and options requested so far.
    pub fn deployments(&self) -> Vec<(String, DeploymentOptions)> {
        self.deployments
            .lock()
            .expect("deployments mutex poisoned")
            .clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            *self.progress.lock().expect("close progress mutex poisoned"),
            CloseProgress::Closed(_)
        )
    }

    fn run_close_hooks(&self) -> Result<(), Cause> {
        let hooks = mem::take(&mut *self.hooks.lock().expect("close hooks mutex poisoned"));
        let mut outcome = Ok(());
        for hook in hooks {
            let result = await_uninterruptibly(
                || {
                    let (promise, completion) = pending();
                    hook(promise);
                    completion
                },
                Duration::from_secs(5),
                &Interrupt::new(),
            );
            if let WaitOutcome::Failed(failure) = result {
                if outcome.is_ok() {
                    outcome = Err(failure);
                }
            }
        }
        outcome
    }
}

impl Runtime for ScriptedRuntime {
    fn add_close_hook(&self, hook: CloseHook) {
        self.hooks.lock().expect("close hooks mutex poisoned").push(hook);
    }

    fn close(&self) -> Completion<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let (promise, completion) = pending();
        {
            let mut progress = self.progress.lock().expect("close progress mutex poisoned");
            if let CloseProgress::Closed(result) = &*progress {
                return Completion::ready(result.clone());
            }
            if let CloseProgress::Closing(waiters) = &mut *progress {
                waiters.push(promise);
                return completion;
            }
            *progress = CloseProgress::Closing(vec![promise]);
        }

        let script = self.close_script.lock().expect("close script mutex poisoned").clone();
        let result = match script {
            Scripted::Hang => {
                if self.hooks_before_hang.load(Ordering::SeqCst) {
                    drop(self.run_close_hooks());
                }
                return completion;
            }
            Scripted::Succeed => self.run_close_hooks(),
            Scripted::Fail(message) => {
                drop(self.run_close_hooks());
                Err(cause(Failure::new(message)))
            }
        };

        let previous = mem::replace(
            &mut *self.progress.lock().expect("close progress mutex poisoned"),
            CloseProgress::Closed(result.clone()),
        );
        if let CloseProgress::Closing(waiters) = previous {
            for waiter in waiters {
                waiter.settle(result.clone());
            }
        }
        completion
    }

    fn deploy(&self, target: DeploymentTarget, options: DeploymentOptions) -> Completion<String> {
        let mut deployments = self.deployments.lock().expect("deployments mutex poisoned");
        deployments.push((target.to_string(), options));
        let id = format!("scripted-deployment-{}", deployments.len());
        drop(deployments);

        match self.deploy_script.lock().expect("deploy script mutex poisoned").clone() {
            Scripted::Succeed => Completion::succeeded(id),
            Scripted::Fail(message) => Completion::failed(cause(Failure::new(message))),
            Scripted::Hang => {
                let (promise, completion) = pending();
                self.parked.lock().expect("parked mutex poisoned").push(promise);
                completion
            }
        }
    }

    fn is_clustered(&self) -> bool {
        false
    }
}

/// Factory handing out one shared [`ScriptedRuntime`].
pub struct ScriptedRuntimeFactory {
    runtime: Arc<ScriptedRuntime>,
    start: Scripted,
    starts: Mutex<Vec<(RuntimeOptions, bool)>>,
    parked: Mutex<Vec<Promise<RuntimeHandle>>>,
}

impl ScriptedRuntimeFactory {
    pub fn new(runtime: Arc<ScriptedRuntime>) -> Self {
        Self {
            runtime,
            start: Scripted::Succeed,
            starts: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_start(mut self, start: Scripted) -> Self {
        self.start = start;
        self
    }

    /// Options and cluster flag of every start request.
    pub fn starts(&self) -> Vec<(RuntimeOptions, bool)> {
        self.starts.lock().expect("starts mutex poisoned").clone()
    }
}

impl RuntimeFactory for ScriptedRuntimeFactory {
    fn start(&self, options: &RuntimeOptions, clustered: bool) -> Completion<RuntimeHandle> {
        self.starts
            .lock()
            .expect("starts mutex poisoned")
            .push((options.clone(), clustered));
        match &self.start {
            Scripted::Succeed => Completion::succeeded(Arc::clone(&self.runtime) as RuntimeHandle),
            Scripted::Fail(message) => Completion::failed(cause(Failure::new(message.clone()))),
            Scripted::Hang => {
                let (promise, completion) = pending();
                self.parked.lock().expect("parked mutex poisoned").push(promise);
                completion
            }
        }
    }
}

/// Shutdown signal fired by the test.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn trigger(&self) {
        let (lock, signal) = &*self.state;
        *lock.lock().expect("shutdown signal mutex poisoned") = true;
        signal.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (lock, signal) = &*self.state;
        let mut triggered = lock.lock().expect("shutdown signal mutex poisoned");
        while !*triggered {
            triggered = signal.wait(triggered).expect("shutdown signal mutex poisoned");
        }
        Ok(())
    }
}

/// Scenario world shared across BDD steps.
/// A console stream whose reader went away.
struct ClosedStream;

impl Write for ClosedStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct TestWorld {
    pub runtime: Arc<ScriptedRuntime>,
    pub hooks: Arc<RecordingHooks>,
    pub signal: TestShutdownSignal,
    start: Scripted,
    metadata: Vec<(String, String)>,
    properties: StaticProperties,
    factory: Option<Arc<ScriptedRuntimeFactory>>,
    deployment: Option<Deployment>,
    exit_code: Option<u8>,
    stdout: String,
    stop_outcome: Option<StopOutcome>,
    timeouts: Timeouts,
    launch_time: Duration,
    closed_streams: bool,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            runtime: Arc::new(ScriptedRuntime::new()),
            hooks: Arc::new(RecordingHooks::default()),
            signal: TestShutdownSignal::default(),
            start: Scripted::Succeed,
            metadata: Vec::new(),
            properties: StaticProperties::new(),
            factory: None,
            deployment: None,
            exit_code: None,
            stdout: String::new(),
            stop_outcome: None,
            timeouts: Timeouts::uniform(Duration::from_secs(2)),
            launch_time: Duration::ZERO,
            closed_streams: false,
        }
    }

    /// Bounds every phase of the next launch by `timeout`.
    pub fn set_phase_timeout(&mut self, timeout: Duration) {
        self.timeouts = Timeouts::uniform(timeout);
    }

    pub fn script_start(&mut self, start: Scripted) {
        self.start = start;
    }

    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata.push((key.to_owned(), value.to_owned()));
    }

    pub fn add_property(&mut self, key: &str, value: &str) {
        self.properties = mem::take(&mut self.properties).with(key, value);
    }

    /// Launches with `argv` (without the program name).
    pub fn launch(&mut self, argv: &[&str]) {
        let factory = Arc::new(
            ScriptedRuntimeFactory::new(Arc::clone(&self.runtime)).with_start(self.start.clone()),
        );
        let attributes: Attributes = self.metadata.iter().cloned().collect();
        let application = Application::new("liftoff-test", Arc::clone(&factory) as Arc<dyn RuntimeFactory>)
            .with_hooks(Arc::clone(&self.hooks) as Arc<dyn LifecycleHooks>)
            .with_metadata(Arc::new(StaticMetadata::new(attributes)))
            .with_properties(Arc::new(self.properties.clone()))
            .with_shutdown_signal(Some(Arc::new(self.signal.clone())))
            .with_timeouts(self.timeouts);
        let args = std::iter::once("liftoff")
            .chain(argv.iter().copied())
            .map(OsString::from);

        let mut stdout = Vec::new();
        let launched_at = Instant::now();
        let launched = if self.closed_streams {
            application.launch(args, &mut ClosedStream, &mut ClosedStream)
        } else {
            application.launch(args, &mut stdout, &mut Vec::new())
        };
        match launched {
            Launch::Deployed(deployment) => self.deployment = Some(deployment),
            Launch::Exited(code) => self.exit_code = Some(code),
        }
        self.launch_time = launched_at.elapsed();
        self.stdout = String::from_utf8_lossy(&stdout).into_owned();
        self.factory = Some(factory);
    }

    /// Makes later launches write to streams that reject every write.
    pub fn close_streams(&mut self) {
        self.closed_streams = true;
    }

    /// Fires the shutdown signal and waits for the stop to finish.
    pub fn signal_shutdown(&mut self) {
        self.signal.trigger();
        if let Some(deployment) = &self.deployment {
            self.stop_outcome = Some(deployment.shutdown().wait_for_termination());
        }
    }

    pub fn deployment(&self) -> Option<&Deployment> {
        self.deployment.as_ref()
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stop_outcome(&self) -> Option<StopOutcome> {
        self.stop_outcome
    }

    /// Wall-clock time the last launch took to return.
    pub fn launch_time(&self) -> Duration {
        self.launch_time
    }

    pub fn starts(&self) -> Vec<(RuntimeOptions, bool)> {
        self.factory
            .as_ref()
            .map(|factory| factory.starts())
            .unwrap_or_default()
    }

    /// Names of the recorded hook events, in order.
    pub fn hook_names(&self) -> Vec<String> {
        self.hooks
            .events()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
