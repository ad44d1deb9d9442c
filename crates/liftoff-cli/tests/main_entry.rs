//! Integration tests for the `liftoff` binary entry point.
//!
//! Covers argument handling and the exit codes of launches that fail before
//! a workload runs.

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::NamedTempFile;

fn command() -> assert_cmd::Command {
    let mut command = cargo_bin_cmd!("liftoff");
    command
        .env_remove("LIFTOFF_MANIFEST")
        .env_remove("RUST_LOG")
        .arg("--log-filter")
        .arg("off");
    command
}

#[test]
fn help_prints_usage_and_succeeds() {
    command()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Usage"))
        .stdout(contains("--deployment-options"));
}

#[test]
fn invalid_arguments_exit_with_code_2() {
    command()
        .args(["--instances", "0", "heartbeat"])
        .assert()
        .code(2)
        .stderr(contains("--instances"));
}

#[test]
fn unknown_workloads_exit_with_code_15() {
    command()
        .arg("no-such-workload")
        .assert()
        .code(15)
        .stderr(contains("no-such-workload"))
        .stdout(contains("Usage"));
}

#[test]
fn missing_workload_exits_with_code_15() {
    command()
        .assert()
        .code(15)
        .stderr(contains("no workload to deploy"));
}

#[test]
fn rejected_runtime_properties_exit_with_code_11() {
    command()
        .env("liftoff.options.eventLoopPoolSize", "0")
        .arg("heartbeat")
        .assert()
        .code(11)
        .stderr(contains("liftoff.options.eventLoopPoolSize"));
}

#[test]
fn clustering_without_a_cluster_manager_exits_with_code_11() {
    command()
        .args(["--cluster", "heartbeat"])
        .assert()
        .code(11)
        .stderr(contains("cluster manager"));
}

#[test]
fn the_manifest_names_the_default_workload() {
    let mut manifest = NamedTempFile::new().expect("create manifest");
    writeln!(manifest, "Main-Class: liftoff").expect("write manifest");
    writeln!(manifest, "Main-Workload: from-manifest").expect("write manifest");
    writeln!(manifest, "Default-Workload-Factory: remote").expect("write manifest");

    command()
        .env("LIFTOFF_MANIFEST", manifest.path())
        .assert()
        .code(15)
        .stderr(contains("remote:from-manifest"));
}
