//! Default runtime built on a multi-threaded tokio runtime.
//!
//! Event loop workloads start on async tasks; worker workloads start on the
//! blocking pool, throttled by a per-pool semaphore. Closing runs close hooks
//! in registration order, stops every deployed instance, leaves the cluster
//! and shuts tokio down, all on a dedicated thread so callers on any thread
//! (including runtime threads) can request it.

mod cluster;
mod registry;

use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use liftoff_config::{DeploymentOptions, MetricsOptions, RuntimeOptions};

pub use cluster::ClusterManager;
pub use registry::{DEFAULT_NAMESPACE, WorkloadRegistry};

use crate::ENGINE_TARGET;
use crate::runtime::{CloseHook, DeploymentTarget, Runtime, RuntimeFactory, RuntimeHandle};
use crate::wait::{self, Cause, Completion, Interrupt, Promise, WaitOutcome, cause, pending};
use crate::workload::{Workload, WorkloadContext, WorkloadFactory};

/// Default bound on each close hook and on leaving the cluster.
pub const DEFAULT_CLOSE_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Failures reported by the tokio engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tokio runtime could not be built.
    #[error("failed to build the tokio runtime: {source}")]
    Build {
        /// Builder error.
        #[source]
        source: io::Error,
    },
    /// Clustering was requested without a cluster manager.
    #[error("clustering was requested but no cluster manager is configured")]
    NoClusterManager,
    /// No factory is registered under the requested name.
    #[error("no workload is registered as '{name}'")]
    UnknownWorkload {
        /// Requested name.
        name: String,
    },
    /// A workload instance returned an error from `start`.
    #[error("instance {instance} of workload {workload} failed to start: {source}")]
    InstanceStart {
        /// Workload name.
        workload: String,
        /// Zero-based instance index.
        instance: u32,
        /// Error returned by the instance.
        #[source]
        source: Cause,
    },
    /// A workload instance panicked in `start`.
    #[error("instance {instance} of workload {workload} panicked while starting")]
    InstancePanicked {
        /// Workload name.
        workload: String,
        /// Zero-based instance index.
        instance: u32,
    },
    /// The runtime is closing or closed.
    #[error("the runtime is closing")]
    Closing,
    /// A close hook did not report back in time.
    #[error("close hook did not complete within {timeout:?}")]
    CloseHookTimedOut {
        /// Limit that was exceeded.
        timeout: Duration,
    },
    /// The close thread could not be spawned.
    #[error("failed to spawn the close thread: {source}")]
    CloseThread {
        /// Spawn error.
        #[source]
        source: io::Error,
    },
}

/// Starts [`TokioRuntime`] instances.
pub struct TokioRuntimeFactory {
    registry: Arc<WorkloadRegistry>,
    cluster: Option<Arc<dyn ClusterManager>>,
    close_hook_timeout: Duration,
}

impl TokioRuntimeFactory {
    /// Creates a factory deploying workloads from `registry`.
    #[must_use]
    pub fn new(registry: WorkloadRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            cluster: None,
            close_hook_timeout: DEFAULT_CLOSE_HOOK_TIMEOUT,
        }
    }

    /// Enables clustering through `cluster`.
    #[must_use]
    pub fn with_cluster_manager(mut self, cluster: Arc<dyn ClusterManager>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Bounds each close hook run while a runtime closes.
    #[must_use]
    pub fn with_close_hook_timeout(mut self, timeout: Duration) -> Self {
        self.close_hook_timeout = timeout;
        self
    }
}

impl RuntimeFactory for TokioRuntimeFactory {
    fn start(&self, options: &RuntimeOptions, clustered: bool) -> Completion<RuntimeHandle> {
        let runtime = match build_runtime(options) {
            Ok(runtime) => runtime,
            Err(source) => {
                error!(
                    target: ENGINE_TARGET,
                    event = "runtime_build_failed",
                    error = %source,
                    "failed to create the runtime"
                );
                return Completion::failed(cause(EngineError::Build { source }));
            }
        };

        let cluster = match (clustered, &self.cluster) {
            (false, _) => None,
            (true, Some(cluster)) => Some(Arc::clone(cluster)),
            (true, None) => {
                runtime.shutdown_background();
                return Completion::failed(cause(EngineError::NoClusterManager));
            }
        };

        let engine = TokioRuntime::new(
            runtime,
            options,
            Arc::clone(&self.registry),
            cluster.clone(),
            self.close_hook_timeout,
        );
        engine.report_metrics(options.metrics_options());

        let Some(cluster) = cluster else {
            return Completion::succeeded(Arc::new(engine) as RuntimeHandle);
        };

        let event_bus = options.event_bus_options();
        info!(
            target: ENGINE_TARGET,
            event = "cluster_joining",
            host = event_bus.host().unwrap_or("<any>"),
            port = event_bus.port(),
            ha_group = options.ha_group(),
            "starting clustering"
        );
        let (promise, completion) = pending();
        cluster.join(options).on_complete(move |outcome| match outcome {
            Ok(()) => {
                info!(target: ENGINE_TARGET, event = "cluster_joined", "joined cluster");
                promise.complete(Arc::new(engine) as RuntimeHandle);
            }
            Err(failure) => {
                error!(
                    target: ENGINE_TARGET,
                    event = "cluster_failed",
                    error = %failure,
                    "failed to form cluster"
                );
                engine.inner.abort();
                promise.fail(failure);
            }
        });
        completion
    }
}

fn build_runtime(options: &RuntimeOptions) -> io::Result<tokio::runtime::Runtime> {
    Builder::new_multi_thread()
        .worker_threads(options.event_loop_pool_size())
        .max_blocking_threads(options.worker_pool_size())
        .thread_name(format!("{}-worker", options.thread_name_prefix()))
        .enable_all()
        .build()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running tokio-backed runtime.
pub struct TokioRuntime {
    inner: Arc<Inner>,
}

struct Limits {
    event_loop: Duration,
    check_interval: Duration,
}

enum CloseState {
    Open,
    Closing(Vec<Promise<()>>),
    Closed(Result<(), Cause>),
}

type Instances = Vec<(Box<dyn Workload>, WorkloadContext)>;

struct Inner {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: Handle,
    thread_name_prefix: String,
    registry: Arc<WorkloadRegistry>,
    cluster: Option<Arc<dyn ClusterManager>>,
    close_hook_timeout: Duration,
    limits: Limits,
    default_pool: Arc<Semaphore>,
    named_pools: Mutex<HashMap<String, Arc<Semaphore>>>,
    close_hooks: Mutex<Vec<CloseHook>>,
    close: Mutex<CloseState>,
    deployments: Mutex<HashMap<String, Instances>>,
}

struct Started {
    instance: u32,
    workload: Box<dyn Workload>,
    context: WorkloadContext,
    result: Result<(), Cause>,
}

impl TokioRuntime {
    fn new(
        runtime: tokio::runtime::Runtime,
        options: &RuntimeOptions,
        registry: Arc<WorkloadRegistry>,
        cluster: Option<Arc<dyn ClusterManager>>,
        close_hook_timeout: Duration,
    ) -> Self {
        let handle = runtime.handle().clone();
        Self {
            inner: Arc::new(Inner {
                runtime: Mutex::new(Some(runtime)),
                handle,
                thread_name_prefix: options.thread_name_prefix().to_owned(),
                registry,
                cluster,
                close_hook_timeout,
                limits: Limits {
                    event_loop: options.max_event_loop_execute_time(),
                    check_interval: options.blocked_thread_check_interval(),
                },
                default_pool: Arc::new(Semaphore::new(options.worker_pool_size())),
                named_pools: Mutex::new(HashMap::new()),
                close_hooks: Mutex::new(Vec::new()),
                close: Mutex::new(CloseState::Open),
                deployments: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Handle for spawning work on the runtime.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Ids of the deployments currently running.
    #[must_use]
    pub fn deployment_ids(&self) -> Vec<String> {
        lock(&self.inner.deployments).keys().cloned().collect()
    }

    fn report_metrics(&self, metrics: &MetricsOptions) {
        if !metrics.enabled() {
            return;
        }
        let period = metrics.report_interval();
        let registry = metrics.registry_name().unwrap_or("default").to_owned();
        let handle = self.inner.handle.clone();
        self.inner.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = handle.metrics();
                info!(
                    target: ENGINE_TARGET,
                    event = "runtime_metrics",
                    registry = %registry,
                    workers = snapshot.num_workers(),
                    alive_tasks = snapshot.num_alive_tasks(),
                    "runtime metrics"
                );
            }
        });
    }
}

impl Runtime for TokioRuntime {
    fn add_close_hook(&self, hook: CloseHook) {
        lock(&self.inner.close_hooks).push(hook);
    }

    fn close(&self) -> Completion<()> {
        let (promise, completion) = pending();
        {
            let mut state = lock(&self.inner.close);
            if let CloseState::Closed(result) = &*state {
                return Completion::ready(result.clone());
            }
            if let CloseState::Closing(waiters) = &mut *state {
                waiters.push(promise);
                return completion;
            }
            *state = CloseState::Closing(vec![promise]);
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("{}-close", self.inner.thread_name_prefix))
            .spawn(move || inner.close_sequence());
        if let Err(source) = spawned {
            self.inner
                .finish_close(Err(cause(EngineError::CloseThread { source })));
        }
        completion
    }

    fn deploy(&self, target: DeploymentTarget, options: DeploymentOptions) -> Completion<String> {
        if !self.inner.is_open() {
            return Completion::failed(cause(EngineError::Closing));
        }
        let factory = match &target {
            DeploymentTarget::Named(name) => match self.inner.registry.resolve(name) {
                Some(factory) => factory,
                None => {
                    return Completion::failed(cause(EngineError::UnknownWorkload {
                        name: name.clone(),
                    }));
                }
            },
            DeploymentTarget::Factory(factory) => Arc::clone(factory),
        };

        let (promise, completion) = pending();
        let inner = Arc::clone(&self.inner);
        let label = target.to_string();
        self.inner.handle.spawn(async move {
            let outcome = inner.deploy_instances(label, factory, options).await;
            promise.settle(outcome);
        });
        completion
    }

    fn is_clustered(&self) -> bool {
        self.inner.cluster.is_some()
    }
}

impl Inner {
    fn is_open(&self) -> bool {
        matches!(*lock(&self.close), CloseState::Open)
    }

    fn worker_pool(&self, options: &DeploymentOptions) -> Arc<Semaphore> {
        match options.worker_pool_name() {
            None => Arc::clone(&self.default_pool),
            Some(name) => Arc::clone(
                lock(&self.named_pools)
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(Semaphore::new(options.worker_pool_size()))),
            ),
        }
    }

    async fn deploy_instances(
        self: Arc<Self>,
        label: String,
        factory: WorkloadFactory,
        options: DeploymentOptions,
    ) -> Result<String, Cause> {
        let deployment_id = Uuid::new_v4().to_string();
        let worker = options.is_worker();
        let limit = if worker {
            options.max_worker_execute_time()
        } else {
            self.limits.event_loop
        };
        if options.ha() && self.cluster.is_none() {
            warn!(
                target: ENGINE_TARGET,
                event = "ha_without_cluster",
                workload = %label,
                "HA deployment requested on a runtime that is not clustered; deploying locally"
            );
        }

        let config = Arc::new(options.config().clone());
        let pool = worker.then(|| self.worker_pool(&options));
        let mut failure: Option<EngineError> = None;
        let mut joins: Vec<JoinHandle<Started>> = Vec::new();

        for instance in 0..options.instances() {
            let context = WorkloadContext::new(
                deployment_id.clone(),
                instance,
                Arc::clone(&config),
                self.handle.clone(),
            );
            let mut workload = factory();
            let join = match &pool {
                Some(pool) => {
                    let Ok(permit) = Arc::clone(pool).acquire_owned().await else {
                        failure = Some(EngineError::Closing);
                        break;
                    };
                    self.handle.spawn_blocking(move || {
                        let result = workload.start(&context);
                        drop(permit);
                        Started {
                            instance,
                            workload,
                            context,
                            result,
                        }
                    })
                }
                None => self.handle.spawn(async move {
                    let result = workload.start(&context);
                    Started {
                        instance,
                        workload,
                        context,
                        result,
                    }
                }),
            };
            joins.push(join);
        }

        let began = Instant::now();
        let mut ticker = tokio::time::interval(self.limits.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut warned = false;
        let mut started: Instances = Vec::new();

        for (index, mut join) in joins.into_iter().enumerate() {
            let joined = loop {
                tokio::select! {
                    joined = &mut join => break joined,
                    _ = ticker.tick() => {
                        let elapsed = began.elapsed();
                        if elapsed > limit && !warned {
                            warned = true;
                            warn!(
                                target: ENGINE_TARGET,
                                event = "start_blocked",
                                deployment_id = %deployment_id,
                                elapsed_ms = elapsed.as_millis(),
                                limit_ms = limit.as_millis(),
                                "workload start has exceeded its execute time limit"
                            );
                        }
                    }
                }
            };
            match joined {
                Ok(Started {
                    workload,
                    context,
                    result: Ok(()),
                    ..
                }) => started.push((workload, context)),
                Ok(Started {
                    instance, result: Err(source), ..
                }) => {
                    failure.get_or_insert(EngineError::InstanceStart {
                        workload: label.clone(),
                        instance,
                        source,
                    });
                }
                Err(join_error) => {
                    debug!(target: ENGINE_TARGET, error = %join_error, "instance task ended abnormally");
                    failure.get_or_insert(EngineError::InstancePanicked {
                        workload: label.clone(),
                        instance: u32::try_from(index).unwrap_or(u32::MAX),
                    });
                }
            }
        }

        if let Some(failure) = failure {
            stop_instances(&deployment_id, started);
            return Err(cause(failure));
        }

        info!(
            target: ENGINE_TARGET,
            event = "deployed",
            deployment_id = %deployment_id,
            workload = %label,
            instances = started.len(),
            worker,
            "deployment started"
        );
        lock(&self.deployments).insert(deployment_id.clone(), started);
        Ok(deployment_id)
    }

    fn close_sequence(&self) {
        let mut failure: Option<Cause> = None;
        let interrupt = Interrupt::new();

        let hooks = mem::take(&mut *lock(&self.close_hooks));
        for hook in hooks {
            let outcome = wait::await_uninterruptibly(
                || {
                    let (promise, completion) = pending();
                    hook(promise);
                    completion
                },
                self.close_hook_timeout,
                &interrupt,
            );
            match outcome {
                WaitOutcome::Succeeded(()) => {}
                WaitOutcome::Failed(hook_failure) => {
                    warn!(target: ENGINE_TARGET, event = "close_hook_failed", error = %hook_failure, "close hook failed");
                    failure.get_or_insert(hook_failure);
                }
                WaitOutcome::TimedOut => {
                    warn!(target: ENGINE_TARGET, event = "close_hook_timed_out", "close hook timed out");
                    failure.get_or_insert(cause(EngineError::CloseHookTimedOut {
                        timeout: self.close_hook_timeout,
                    }));
                }
            }
        }

        let deployments = mem::take(&mut *lock(&self.deployments));
        for (deployment_id, instances) in deployments {
            stop_instances(&deployment_id, instances);
        }

        if let Some(cluster) = &self.cluster {
            match wait::await_uninterruptibly(|| cluster.leave(), self.close_hook_timeout, &interrupt) {
                WaitOutcome::Succeeded(()) => info!(target: ENGINE_TARGET, event = "cluster_left", "left cluster"),
                WaitOutcome::Failed(leave_failure) => {
                    warn!(target: ENGINE_TARGET, event = "cluster_leave_failed", error = %leave_failure, "failed to leave cluster");
                }
                WaitOutcome::TimedOut => {
                    warn!(target: ENGINE_TARGET, event = "cluster_leave_timed_out", "timed out leaving cluster");
                }
            }
        }

        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }

        self.finish_close(failure.map_or(Ok(()), Err));
    }

    fn finish_close(&self, result: Result<(), Cause>) {
        let previous = mem::replace(&mut *lock(&self.close), CloseState::Closed(result.clone()));
        match &result {
            Ok(()) => info!(target: ENGINE_TARGET, event = "closed", "runtime closed"),
            Err(failure) => warn!(target: ENGINE_TARGET, event = "closed_with_failure", error = %failure, "runtime closed with failure"),
        }
        if let CloseState::Closing(waiters) = previous {
            for waiter in waiters {
                waiter.settle(result.clone());
            }
        }
    }

    fn abort(&self) {
        *lock(&self.close) = CloseState::Closed(Err(cause(EngineError::Closing)));
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

fn stop_instances(deployment_id: &str, instances: Instances) {
    for (mut workload, context) in instances {
        if let Err(failure) = workload.stop(&context) {
            warn!(
                target: ENGINE_TARGET,
                event = "instance_stop_failed",
                deployment_id,
                instance = context.instance(),
                error = %failure,
                "workload instance failed to stop"
            );
        }
    }
}
