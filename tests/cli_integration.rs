//! CLI integration tests
//!
//! Run the built binary against pipeline descriptions written to a
//! temporary directory and check output and exit codes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const PIPELINE: &str = r#"
name: marble-pipeline
namespace: marble
aws:
  account: "123456789012"
  region: us-east-1
context:
  owner: wse
  contact: wse@nd.edu
sources:
  app: { name: AppCode, owner: ndlib, repo: marble-app }
  infra: { name: InfraCode, owner: ndlib, repo: marble-blueprints }
containers:
  - { name: rails, repository: marble-rails }
approval_topic_arn: arn:aws:sns:us-east-1:123456789012:approvals
stages:
  - { name: Test, env: test, capabilities: [s3, ecs] }
  - { name: Production, env: prod }
"#;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("pipeline.yml");
    fs::write(&path, contents).expect("Failed to write pipeline.yml");
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dec-pipelines"))
        .args(args)
        .env_remove("DEC_NAMESPACE_PREFIX")
        .env_remove("DEC_AWS_ACCOUNT")
        .env_remove("DEC_AWS_REGION")
        .output()
        .expect("Failed to execute dec-pipelines")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("Non UTF-8 temp path")
}

#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("synth"));
    assert!(stdout.contains("policy"));
    assert!(stdout.contains("validate"));
}

#[test]
fn test_synth_json() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, PIPELINE);

    let output = run(&["synth", path_arg(&config), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["name"], "marble-pipeline");
    let stages: Vec<&str> = value["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(stages, vec!["Source", "Build", "Test", "Production"]);
}

#[test]
fn test_synth_to_file_with_buildspecs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, PIPELINE);
    let out = dir.path().join("pipeline.yaml");
    let specs = dir.path().join("specs");

    let output = run(&[
        "synth",
        path_arg(&config),
        "-f",
        "yaml",
        "-o",
        path_arg(&out),
        "--buildspec-dir",
        path_arg(&specs),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let yaml = fs::read_to_string(&out).unwrap();
    assert!(yaml.contains("name: marble-pipeline"));
    assert!(specs.join("build-rails-build.yml").exists());
    assert!(specs.join("test-deploy.yml").exists());
    assert!(specs.join("production-deploy.yml").exists());
}

#[test]
fn test_synth_missing_config() {
    let output = run(&["synth", "/nonexistent/pipeline.yml"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

#[test]
fn test_policy_command() {
    let output = run(&[
        "policy",
        "--namespace",
        "marble-test",
        "--account",
        "123456789012",
        "-c",
        "s3",
        "--global",
        "ecr-auth",
    ]);
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["Version"], "2012-10-17");
    let statements = value["Statement"].as_array().unwrap();
    assert_eq!(statements.len(), 2);
}

#[test]
fn test_policy_requires_something_to_grant() {
    let output = run(&["policy", "--namespace", "marble-test", "--account", "123456789012"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_validate_passes() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, PIPELINE);

    let output = run(&["validate", path_arg(&config)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stdout));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Result: OK"));
}

#[test]
fn test_validate_fails_on_missing_dockerfile() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, PIPELINE);
    let checkout = dir.path().join("app");
    fs::create_dir_all(&checkout).unwrap();

    let output = run(&[
        "validate",
        path_arg(&config),
        "--app-checkout",
        path_arg(&checkout),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("rails-build"));
    assert!(stdout.contains("Result: FAILED"));

    fs::write(checkout.join("Dockerfile"), "FROM ruby:3.2\n").unwrap();
    let output = run(&[
        "validate",
        path_arg(&config),
        "--app-checkout",
        path_arg(&checkout),
    ]);
    assert!(output.status.success());
}

#[test]
fn test_validate_rejects_missing_context() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &PIPELINE.replace("  owner: wse\n", ""));

    let output = run(&["validate", path_arg(&config)]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("owner"));
}
