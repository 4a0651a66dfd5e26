mod common;

use common::{sseal, TestFixture};
use serde_json::Value;

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap_or_else(|| panic!("expected array, got {value}"))
        .iter()
        .map(|item| item.as_str().expect("string item").to_string())
        .collect()
}

fn check_fixture(name: &str) -> Value {
    let fixture = TestFixture::load(name).expect("load fixture");
    let output = fixture.analyze();
    if let Some(code) = fixture.config.expected_exit {
        assert_eq!(output.code, Some(code), "stderr:\n{}", output.stderr);
        return Value::Null;
    }
    assert!(output.success(), "analyze failed:\n{}", output.stderr);
    let report = output.json();
    if let Some(expected) = &fixture.config.expected_dependencies {
        assert_eq!(&strings(&report["dependencies"]), expected);
    }
    if let Some(expected) = &fixture.config.expected_datasets {
        assert_eq!(&strings(&report["datasets"]), expected);
    }
    if let Some(expected) = &fixture.config.expected_outputs {
        let codes: Vec<String> = report["output_datasets"]
            .as_array()
            .expect("output datasets")
            .iter()
            .map(|record| record["code"].as_str().expect("code").to_string())
            .collect();
        assert_eq!(&codes, expected);
    }
    report
}

#[test]
fn transform_directives_drive_the_report() {
    let report = check_fixture("transform");
    let outputs = report["output_datasets"].as_array().expect("outputs");
    assert_eq!(outputs[0]["symbol"], "dataset");
    assert_eq!(outputs[0]["filename_expr"], "FILENAME");
    assert!(report.get("environment").is_none());
}

#[test]
fn stdlib_imports_are_not_dependencies() {
    check_fixture("stdlib_only");
}

#[test]
fn ambiguous_override_exits_with_collision_status() {
    let fixture = TestFixture::load("collision").expect("load fixture");
    let output = fixture.analyze();
    assert_eq!(output.code, Some(3));
    assert!(output.stderr.contains("polars"), "stderr:\n{}", output.stderr);
    check_fixture("collision");
}

#[test]
fn environment_pointer_is_reported() {
    let report = check_fixture("environment");
    assert_eq!(report["environment"], "envs/analysis");
}

#[test]
fn ignoring_directives_leaves_defaults() {
    let fixture = TestFixture::load("transform").expect("load fixture");
    let script = fixture.script_path();
    let output = sseal(
        ["analyze", script.to_str().expect("utf-8 path"), "--no-detect-config"],
        &fixture.fixture_dir,
    );
    assert!(output.success(), "stderr:\n{}", output.stderr);
    let report = output.json();
    assert!(report.get("dependencies").is_none());
    assert!(report.get("datasets").is_none());
    assert!(report.get("output_datasets").is_some());
}

#[test]
fn missing_environment_pointer_is_a_configuration_error() {
    let fixture = TestFixture::load("stdlib_only").expect("load fixture");
    let script = fixture.script_path();
    let output = sseal(
        ["analyze", script.to_str().expect("utf-8 path"), "--parse-environment"],
        &fixture.fixture_dir,
    );
    assert_eq!(output.code, Some(2), "stderr:\n{}", output.stderr);
}

#[test]
fn unreadable_script_exits_with_io_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = sseal(["analyze", "missing.py"], dir.path());
    assert_eq!(output.code, Some(1));
    assert!(output.stderr.starts_with("error:"));
}
