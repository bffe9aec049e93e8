use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::{json, Value};
use tempfile::TempDir;

fn write_filter(dir: &TempDir, document: Value) -> PathBuf {
    let path = dir.path().join("filter.json");
    fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
    path
}

fn glue() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_glue"));
    command.env("RUST_LOG", "warn");
    command
}

#[test]
fn check_reports_fragment_errors_by_user_line() {
    let temp = TempDir::new().unwrap();
    let filter = write_filter(
        &temp,
        json!({
            "id": "broken",
            "name": "Broken",
            "fragmentShader": "void main() {\n  gl_FragColor = vec4(undefined_value);\n}"
        }),
    );

    let output = glue().arg("check").arg(&filter).output().unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fragment:2:"), "stdout: {stdout}");
    assert!(!stdout.contains("vertex:"), "stdout: {stdout}");
}

#[test]
fn check_accepts_filter_with_settings() {
    let temp = TempDir::new().unwrap();
    let filter = write_filter(
        &temp,
        json!({
            "id": "tint",
            "name": "Tint",
            "settings": [
                {"key": "strength", "name": "Strength", "type": "float", "defaultValue": 0.5},
                {"key": "tint", "name": "Tint", "type": "color", "defaultValue": "#ff8800"}
            ],
            "fragmentShader": "void main() {\n  vec4 base = texture2D(iTexture, gl_FragCoord.xy / iResolution.xy);\n  gl_FragColor = mix(base, vec4(tint, 1.0), strength);\n}"
        }),
    );

    let output = glue().arg("check").arg(&filter).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("Tint: ok"));
}

#[test]
fn check_json_output_lists_diagnostics() {
    let temp = TempDir::new().unwrap();
    let filter = write_filter(
        &temp,
        json!({
            "vertexShader": "void main() {\n\n  gl_Position = vec4(nowhere, 1.0);\n}"
        }),
    );

    let output = glue().args(["check", "--json"]).arg(&filter).output().unwrap();
    assert!(!output.status.success());
    let diagnostics: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert!(!diagnostics.is_empty());
    assert!(diagnostics
        .iter()
        .all(|entry| entry["stage"] == json!("vertex")));
    assert!(diagnostics.iter().any(|entry| entry["line"] == json!(3)));
}

#[test]
fn check_fails_on_missing_filter() {
    let temp = TempDir::new().unwrap();
    let output = glue()
        .arg("check")
        .arg(temp.path().join("absent.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read filter"), "stderr: {stderr}");
}
