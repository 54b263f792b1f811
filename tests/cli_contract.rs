use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::tempdir;

fn run_cli(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gradient-studio"))
        .current_dir(cwd)
        .env("RUST_LOG", "off")
        .args(args)
        .output()
        .expect("gradient-studio command should run")
}

fn stderr_envelope(output: &Output) -> Value {
    serde_json::from_slice(&output.stderr).unwrap_or_else(|error| {
        panic!(
            "stderr should hold a json envelope ({error}): {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn write_config(dir: &Path, yaml: &str) -> String {
    let path = dir.join("editor.yaml");
    fs::write(&path, yaml).expect("config should write");
    path.display().to_string()
}

#[test]
fn params_json_lists_every_parameter_once() {
    let dir = tempdir().expect("tempdir should create");
    let first = run_cli(dir.path(), &["params", "--json"]);
    assert!(first.status.success(), "params --json should succeed");
    let second = run_cli(dir.path(), &["params", "--json"]);
    assert_eq!(first.stdout, second.stdout, "json output should be stable");

    let parsed: Value = serde_json::from_slice(&first.stdout).expect("json should parse");
    let params = parsed["params"].as_array().expect("params should be array");
    assert_eq!(params.len(), 45);
    let fov = params
        .iter()
        .find(|entry| entry["name"] == "cameraFov")
        .expect("cameraFov should be listed");
    assert_eq!(fov["category"], "camera");
    assert_eq!(fov["default"], 45.0);
}

#[test]
fn validate_reports_verdict_and_exit_status() {
    let dir = tempdir().expect("tempdir should create");

    let ok = run_cli(dir.path(), &["validate", "diffuseIntensity", "1.5"]);
    assert!(ok.status.success());
    assert!(String::from_utf8_lossy(&ok.stdout).contains("valid"));

    let bad = run_cli(
        dir.path(),
        &["validate", "diffuseIntensity", "5", "--json"],
    );
    assert_eq!(bad.status.code(), Some(1));
    let parsed: Value = serde_json::from_slice(&bad.stdout).expect("json should parse");
    assert_eq!(parsed["result"]["valid"], false);
}

#[test]
fn unknown_parameter_is_a_usage_error_with_envelope() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_cli(dir.path(), &["validate", "noSuchParam", "1", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty(), "errors stay off stdout");

    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "INVALID_PARAMETER");
    assert!(envelope["error"]["message"]
        .as_str()
        .is_some_and(|message| message.contains("noSuchParam")));
}

#[test]
fn render_writes_png_with_preset_and_overrides() {
    let dir = tempdir().expect("tempdir should create");
    let config = write_config(dir.path(), "render:\n  width: 48\n  height: 32\n");
    let output = run_cli(
        dir.path(),
        &[
            "render",
            "--config",
            &config,
            "-o",
            "out/frame.png",
            "--preset",
            "sunset",
            "--set",
            "planeSegments=8",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "render should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("json should parse");
    assert_eq!(parsed["mime"], "image/png");
    assert_eq!(parsed["width"], 48);

    let image = image::open(dir.path().join("out/frame.png")).expect("png should decode");
    assert_eq!((image.width(), image.height()), (48, 32));
}

#[test]
fn invalid_override_rejects_the_render() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_cli(
        dir.path(),
        &[
            "render",
            "-o",
            "frame.png",
            "--set",
            "cameraFov=999",
            "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_envelope(&output)["error"]["code"], "INVALID_PARAMETERS");
    assert!(!dir.path().join("frame.png").exists());
}

#[test]
fn unknown_preset_maps_to_preset_not_found() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_cli(
        dir.path(),
        &["render", "-o", "frame.png", "--preset", "nope", "--json"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_envelope(&output)["error"]["code"], "PRESET_NOT_FOUND");
}

#[test]
fn export_code_to_stdout_and_file() {
    let dir = tempdir().expect("tempdir should create");

    let stdout = run_cli(
        dir.path(),
        &["export-code", "--format", "wgsl", "--stdout"],
    );
    assert!(stdout.status.success());
    let code = String::from_utf8(stdout.stdout).expect("utf8");
    assert!(code.contains("fn vs_main"));

    let written = run_cli(
        dir.path(),
        &["export-code", "--format", "html", "-o", "web/index.html"],
    );
    assert!(written.status.success());
    let html = fs::read_to_string(dir.path().join("web/index.html")).expect("html should exist");
    assert!(html.starts_with("<!doctype html>"));
}

#[test]
fn unsupported_code_format_is_rejected() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_cli(
        dir.path(),
        &["export-code", "--format", "glsl", "--stdout", "--json"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_envelope(&output)["error"]["code"], "UNSUPPORTED_FORMAT");
}

#[test]
fn saved_preset_is_listed_on_next_run() {
    let dir = tempdir().expect("tempdir should create");
    let config = write_config(dir.path(), "presets:\n  directory: presets\n");

    let saved = run_cli(
        dir.path(),
        &[
            "save-preset",
            "My Look",
            "--config",
            &config,
            "--preset",
            "aurora",
            "--set",
            "color1=#102030",
        ],
    );
    assert!(
        saved.status.success(),
        "save should succeed: {}",
        String::from_utf8_lossy(&saved.stderr)
    );

    let listed = run_cli(dir.path(), &["presets", "--config", &config, "--json"]);
    assert!(listed.status.success());
    let parsed: Value = serde_json::from_slice(&listed.stdout).expect("json should parse");
    let mine = parsed["presets"]
        .as_array()
        .expect("presets array")
        .iter()
        .find(|preset| preset["name"] == "My Look")
        .cloned()
        .expect("saved preset should be listed");
    assert_eq!(mine["builtin"], false);
}

#[test]
fn save_preset_without_directory_is_a_config_error() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_cli(dir.path(), &["save-preset", "x", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_envelope(&output)["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn malformed_config_reports_location() {
    let dir = tempdir().expect("tempdir should create");
    let config = write_config(dir.path(), "render:\n  width: 64\n  colour: red\n");
    let output = run_cli(dir.path(), &["presets", "--config", &config, "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["error"]["code"], "CONFIG_ERROR");
    assert!(envelope["error"]["message"]
        .as_str()
        .is_some_and(|message| message.contains("line 3")));
}
