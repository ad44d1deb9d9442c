//! Behavioural tests for the launch lifecycle.

use std::cell::RefCell;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::shutdown::StopOutcome;

use super::support::{HookEvent, Scripted, TestWorld};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',').map(|name| name.trim().to_owned()).collect()
}

#[given("a runtime that starts")]
fn given_runtime_starts(world: &RefCell<TestWorld>) {
    world.borrow_mut().script_start(Scripted::Succeed);
}

#[given("a runtime that fails to start with \"{message}\"")]
fn given_runtime_fails(world: &RefCell<TestWorld>, message: String) {
    world.borrow_mut().script_start(Scripted::Fail(message));
}

#[given("a runtime that never starts")]
fn given_runtime_never_starts(world: &RefCell<TestWorld>) {
    world.borrow_mut().script_start(Scripted::Hang);
}

#[given("every phase is bounded by {millis} milliseconds")]
fn given_phase_timeout(world: &RefCell<TestWorld>, millis: u64) {
    world
        .borrow_mut()
        .set_phase_timeout(Duration::from_millis(millis));
}

#[given("deployments fail with \"{message}\"")]
fn given_deployments_fail(world: &RefCell<TestWorld>, message: String) {
    world.borrow().runtime.script_deploy(Scripted::Fail(message));
}

#[given("the manifest attribute \"{key}\" is \"{value}\"")]
fn given_manifest_attribute(world: &RefCell<TestWorld>, key: String, value: String) {
    world.borrow_mut().add_metadata(&key, &value);
}

#[when("the launcher runs with \"{arguments}\"")]
fn when_launcher_runs(world: &RefCell<TestWorld>, arguments: String) {
    let argv: Vec<&str> = arguments.split_whitespace().collect();
    world.borrow_mut().launch(&argv);
}

#[when("the launcher runs without a workload")]
fn when_launcher_runs_bare(world: &RefCell<TestWorld>) {
    world.borrow_mut().launch(&[]);
}

#[when("the shutdown signal fires")]
fn when_signal_fires(world: &RefCell<TestWorld>) {
    world.borrow_mut().signal_shutdown();
}

#[then("the workload is deployed as \"{target}\"")]
fn then_deployed_as(world: &RefCell<TestWorld>, target: String) -> StepResult {
    let state = world.borrow();
    if state.deployment().is_none() {
        return Err(format!("launch exited with {:?}", state.exit_code()));
    }
    let deployments = state.runtime.deployments();
    match deployments.first() {
        Some((deployed, _)) if *deployed == target => Ok(()),
        other => Err(format!("expected a deployment of {target}, got {other:?}")),
    }
}

#[then("the launcher exits with code {code}")]
fn then_exit_code(world: &RefCell<TestWorld>, code: u8) {
    assert_eq!(world.borrow().exit_code(), Some(code));
}

#[then("the hooks so far are \"{names}\"")]
fn then_hooks_so_far(world: &RefCell<TestWorld>, names: String) {
    assert_eq!(world.borrow().hook_names(), split_names(&names));
}

#[then("the last hooks are \"{names}\"")]
fn then_last_hooks(world: &RefCell<TestWorld>, names: String) -> StepResult {
    let expected = split_names(&names);
    let recorded = world.borrow().hook_names();
    if recorded.ends_with(&expected) {
        Ok(())
    } else {
        Err(format!("hooks {recorded:?} do not end with {expected:?}"))
    }
}

#[then("the start failure carries no cause")]
fn then_start_failure_without_cause(world: &RefCell<TestWorld>) -> StepResult {
    let events = world.borrow().hooks.events();
    if events.contains(&HookEvent::AfterFailureToStartRuntime { cause: None }) {
        Ok(())
    } else {
        Err(format!("no cause-free start failure in {events:?}"))
    }
}

#[then("the launch gave up within {seconds} seconds")]
fn then_gave_up_within(world: &RefCell<TestWorld>, seconds: u64) -> StepResult {
    let took = world.borrow().launch_time();
    if took < Duration::from_secs(seconds) {
        Ok(())
    } else {
        Err(format!("the launch took {took:?}"))
    }
}

#[then("the usage text was printed")]
fn then_usage_printed(world: &RefCell<TestWorld>) -> StepResult {
    if world.borrow().stdout().contains("Usage") {
        Ok(())
    } else {
        Err("stdout carries no usage text".to_owned())
    }
}

#[then("the runtime stopped cleanly")]
fn then_stopped_cleanly(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow().stop_outcome(), Some(StopOutcome::Stopped));
}

#[then("no deployment was attempted")]
fn then_no_deployment(world: &RefCell<TestWorld>) {
    assert!(world.borrow().runtime.deployments().is_empty());
}

#[then("the runtime was started clustered on port {port}")]
fn then_started_clustered(world: &RefCell<TestWorld>, port: u16) -> StepResult {
    let starts = world.borrow().starts();
    let Some((options, clustered)) = starts.first() else {
        return Err("the runtime was never started".to_owned());
    };
    if !clustered {
        return Err("the runtime was started without clustering".to_owned());
    }
    if options.event_bus_options().port() != port {
        return Err(format!(
            "event bus port {} differs from {port}",
            options.event_bus_options().port()
        ));
    }
    Ok(())
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "A named workload is deployed and stopped by a signal"
)]
fn named_workload_lifecycle(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "A runtime that fails to start exits with code 11"
)]
fn runtime_start_failure(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "A failed deployment closes the runtime and exits with code 15"
)]
fn deployment_failure(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "A missing workload name exits with code 15"
)]
fn missing_workload_name(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "The manifest supplies the workload and its factory prefix"
)]
fn manifest_workload(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "Clustered launches pass the cluster flag to the runtime"
)]
fn clustered_launch(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/launch_lifecycle.feature",
    name = "A clustered runtime that never starts times out with code 11"
)]
fn clustered_start_timeout(world: RefCell<TestWorld>) {
    let _ = world;
}
