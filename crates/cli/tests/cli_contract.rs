use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "VASTVIEW_CACHE_PERCENT",
    "VASTVIEW_SAMPLE_SHIFT",
    "VASTVIEW_MIN_VISIBLE_PIXELS",
    "VASTVIEW_MEMORY_LIMIT_MB",
    "VASTVIEW_LOG_TRANSITIONS",
    "RUST_LOG",
];

fn fixture_pixel(x: u32, y: u32) -> [u8; 4] {
    [(x % 256) as u8, (y % 256) as u8, 128, 255]
}

/// A 400x300 gradient PNG in a fresh temp dir
fn png_fixture() -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("scene.png");
    let img = image::RgbaImage::from_fn(400, 300, |x, y| image::Rgba(fixture_pixel(x, y)));
    img.save(&path).expect("fixture should be written");
    (temp, path)
}

/// The binary with no user config or VASTVIEW_* overrides leaking in
fn vastview(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("vastview");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home).env("XDG_CONFIG_HOME", home.join(".config"));
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

#[test]
fn info_emits_stable_json_contract() {
    let (temp, png) = png_fixture();

    let value = stdout_json(
        vastview(temp.path())
            .arg("info")
            .arg(&png)
            .args(["--width", "80", "--height", "60"])
            .args(["--memory-limit-mb", "1", "--budget-percent", "10"]),
    );

    assert_eq!(value["scene"], json!({ "width": 400, "height": 300 }));
    assert_eq!(value["sample"], json!({ "width": 100, "height": 75 }));
    assert_eq!(value["viewport"], json!({ "width": 80, "height": 60 }));
    assert_eq!(
        value["cache_window"],
        json!({ "left": 0, "top": 0, "right": 172, "bottom": 152 })
    );
    assert_eq!(value["budget_percent"], 10);
}

#[test]
fn render_writes_viewport_png() {
    let (temp, png) = png_fixture();
    let output_path = temp.path().join("out").join("view.png");

    let value = stdout_json(
        vastview(temp.path())
            .arg("render")
            .arg(&png)
            .args(["--x", "100", "--y", "50", "--width", "80", "--height", "60"])
            .arg("--output")
            .arg(&output_path),
    );

    assert_eq!(value["cache_state"], "ready");
    assert_eq!(
        value["window"],
        json!({ "left": 100, "top": 50, "right": 180, "bottom": 110 })
    );
    assert_eq!(value["stats"]["cache_frames"], 1);

    let image = image::open(&output_path).expect("output should be a readable image").into_rgba8();
    assert_eq!(image.dimensions(), (80, 60));
    assert_eq!(image.get_pixel(0, 0).0, fixture_pixel(100, 50));
    assert_eq!(image.get_pixel(79, 59).0, fixture_pixel(179, 109));
}

#[test]
fn render_applies_zoom() {
    let (temp, png) = png_fixture();
    let output_path = temp.path().join("zoomed.png");

    let value = stdout_json(
        vastview(temp.path())
            .arg("render")
            .arg(&png)
            .args(["--x", "100", "--y", "50", "--width", "80", "--height", "60"])
            .args(["--zoom", "2"])
            .arg("--output")
            .arg(&output_path),
    );

    assert_eq!(
        value["window"],
        json!({ "left": 100, "top": 50, "right": 140, "bottom": 80 })
    );
    let image = image::open(&output_path).expect("output should be a readable image").into_rgba8();
    assert_eq!(image.get_pixel(0, 0).0, fixture_pixel(100, 50));
    assert_eq!(image.get_pixel(1, 1).0, fixture_pixel(100, 50));
    assert_eq!(image.get_pixel(2, 2).0, fixture_pixel(101, 51));
}

#[test]
fn render_clamps_origin_into_scene() {
    let (temp, png) = png_fixture();

    let value = stdout_json(
        vastview(temp.path())
            .arg("render")
            .arg(&png)
            .args(["--x", "-20", "--y", "9999", "--width", "80", "--height", "60"])
            .arg("--output")
            .arg(temp.path().join("clamped.png")),
    );

    assert_eq!(
        value["window"],
        json!({ "left": 0, "top": 240, "right": 80, "bottom": 300 })
    );
}

#[test]
fn render_reads_raw_rgba() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let raw_path = temp.path().join("scene.rgba");
    let mut bytes = Vec::new();
    for y in 0..48 {
        for x in 0..64 {
            bytes.extend_from_slice(&fixture_pixel(x, y));
        }
    }
    std::fs::write(&raw_path, bytes).expect("raw fixture should be written");
    let output_path = temp.path().join("raw.png");

    vastview(temp.path())
        .arg("render")
        .arg(&raw_path)
        .args(["--raw", "64x48"])
        .args(["--x", "10", "--y", "5", "--width", "32", "--height", "24"])
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("output should be a readable image").into_rgba8();
    assert_eq!(image.get_pixel(0, 0).0, fixture_pixel(10, 5));
    assert_eq!(image.get_pixel(31, 23).0, fixture_pixel(41, 28));
}

#[test]
fn config_prints_defaults_as_yaml() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    vastview(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("budget_percent: 5"))
        .stdout(predicate::str::contains("sample_shift: 2"));
}

#[test]
fn config_env_overrides_are_applied() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    vastview(temp.path())
        .arg("config")
        .env("VASTVIEW_CACHE_PERCENT", "42")
        .assert()
        .success()
        .stdout(predicate::str::contains("budget_percent: 42"));
}

#[test]
fn config_file_feeds_scene() {
    let (temp, png) = png_fixture();
    let config_path = temp.path().join("conf").join("vastview.yaml");
    std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    std::fs::write(&config_path, "budget_percent: 10\nmemory_limit_mb: 1\n").unwrap();

    let value = stdout_json(
        vastview(temp.path())
            .arg("info")
            .arg(&png)
            .args(["--width", "80", "--height", "60"])
            .arg("--config")
            .arg(&config_path),
    );

    assert_eq!(value["budget_percent"], 10);
    assert_eq!(value["cache_window"]["right"], 172);
}

#[test]
fn config_output_round_trips() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let config_path = temp.path().join("saved.yaml");

    vastview(temp.path())
        .arg("config")
        .arg("--output")
        .arg(&config_path)
        .env("VASTVIEW_SAMPLE_SHIFT", "3")
        .assert()
        .success();

    vastview(temp.path())
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("sample_shift: 3"));
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    vastview(temp.path())
        .arg("info")
        .arg(temp.path().join("missing.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_image() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let bogus = temp.path().join("bogus.png");
    std::fs::write(&bogus, b"definitely not an image").unwrap();

    vastview(temp.path())
        .arg("info")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open image"));
}

#[test]
fn info_rejects_invalid_budget() {
    let (temp, png) = png_fixture();

    vastview(temp.path())
        .arg("info")
        .arg(&png)
        .args(["--budget-percent", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn raw_rejects_short_stream() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let raw_path = temp.path().join("short.rgba");
    std::fs::write(&raw_path, vec![0u8; 100]).unwrap();

    vastview(temp.path())
        .arg("info")
        .arg(&raw_path)
        .args(["--raw", "64x48"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open raw image"));
}

#[test]
fn version_prints_package_version() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    vastview(temp.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
