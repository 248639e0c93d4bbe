#![allow(deprecated)] // TODO: move from Command::cargo_bin to cargo_bin_cmd!

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SOURCE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../source");

/// `etl` running in an empty directory against the repository's templates
fn etl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("etl").unwrap();
    cmd.current_dir(dir.path())
        .env("ETLFLOW_SOURCE_DIR", SOURCE_DIR)
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("ETLFLOW_CONFIG_PATH")
        .env_remove("AWS_REGION");
    cmd
}

/// Project under `dir` with a copy of the templates and an application code directory
fn project(dir: &TempDir) -> PathBuf {
    let resources = dir.path().join("source/app_resources");
    fs::create_dir_all(&resources).unwrap();
    for entry in fs::read_dir(Path::new(SOURCE_DIR).join("app_resources")).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), resources.join(entry.file_name())).unwrap();
    }
    let app_code = dir.path().join("deployment/app_code/job");
    fs::create_dir_all(&app_code).unwrap();
    fs::write(app_code.join("wordcount.py"), "print('hello')\n").unwrap();
    dir.path().join("source")
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("etl").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Apache Spark"))
        .stdout(predicate::str::contains("synth"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("destroy"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("etl").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("etlflow"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("etl").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_deploy_help() {
    let mut cmd = Command::cargo_bin("etl").unwrap();
    cmd.args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--region"));
}

#[test]
fn test_validate() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan is valid"))
        .stdout(predicate::str::contains("eks_cluster"))
        .stdout(predicate::str::contains("Telemetry: off"));
}

#[test]
fn test_synth_prints_template() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .arg("synth")
        .assert()
        .success()
        .stdout(predicate::str::contains("AWSTemplateFormatVersion"))
        .stdout(predicate::str::contains("\"AssetsBucket\""))
        .stdout(predicate::str::contains("JUPYTERURL"));
}

#[test]
fn test_synth_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("template.json");
    etl(&dir)
        .args(["synth", "--output"])
        .arg(&path)
        .assert()
        .success();

    let template: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        template["Resources"]["NetworksgEksVpc"]["Type"],
        "AWS::EC2::VPC"
    );
    assert!(template["Outputs"]["CODEBUCKET"].is_object());
}

#[test]
fn test_synth_uses_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("etlflow.yaml"),
        "cluster_name: analytics\ntelemetry: true\n",
    )
    .unwrap();
    etl(&dir)
        .arg("synth")
        .assert()
        .success()
        .stdout(predicate::str::contains("jHubPwd-analytics"))
        .stdout(predicate::str::contains("AnonymousDatatoAWS"));
}

#[test]
fn test_cdn_synth_requires_cdn_config() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .args(["synth", "--cdn"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cdn.enabled"));
}

#[test]
fn test_plan_from_scratch() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("to create"));
}

#[test]
fn test_deploy_without_yes_only_shows_the_plan() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .arg("deploy")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.yaml");
    fs::write(&config, "stack_name: 1-starts-with-a-digit\n").unwrap();
    etl(&dir)
        .arg("validate")
        .env("ETLFLOW_CONFIG_PATH", &config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("stack_name"));
}

#[test]
fn test_missing_source_dir_fails() {
    let dir = TempDir::new().unwrap();
    etl(&dir)
        .arg("validate")
        .env("ETLFLOW_SOURCE_DIR", dir.path().join("nope"))
        .env_remove("VIRTUAL_ENV")
        .assert()
        .failure();
}

#[test]
fn test_malformed_template_fails_synth() {
    let dir = TempDir::new().unwrap();
    let source = project(&dir);
    fs::write(source.join("app_resources/alb-values.yaml"), "region: [unclosed\n").unwrap();

    etl(&dir)
        .arg("synth")
        .env("ETLFLOW_SOURCE_DIR", &source)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("alb-values.yaml"))
        .stderr(predicate::str::contains("check formatting"));
}

/// `aws` stand-in: a signed-in caller, no CDN stack, and deletes that succeed
#[cfg(unix)]
fn fake_aws(dir: &Path) -> std::ffi::OsString {
    use std::os::unix::fs::PermissionsExt;
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let script = r#"#!/bin/sh
case "$*" in
  "sts get-caller-identity"*)
    echo '{"UserId": "AIDA1", "Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/dev"}' ;;
  "cloudformation describe-stacks"*)
    echo "An error occurred (ValidationError): Stack with id $4 does not exist" >&2
    exit 254 ;;
esac
"#;
    fs::write(bin.join("aws"), script).unwrap();
    fs::set_permissions(bin.join("aws"), fs::Permissions::from_mode(0o755)).unwrap();

    let mut path = bin.into_os_string();
    if let Some(inherited) = std::env::var_os("PATH") {
        path.push(":");
        path.push(inherited);
    }
    path
}

#[cfg(unix)]
#[test]
fn test_destroy_with_telemetry_does_not_need_the_stack_to_build() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(dir.path().join("etlflow.yaml"), "telemetry: true\n").unwrap();

    etl(&dir)
        .args(["destroy", "--yes"])
        .env("ETLFLOW_SOURCE_DIR", &source)
        .env("AWS_REGION", "us-east-1")
        .env("PATH", fake_aws(dir.path()))
        .assert()
        .success()
        .stdout(predicate::str::contains("Destroy complete"));

    assert!(!dir.path().join(".etlflow/lock.json").exists());
}
