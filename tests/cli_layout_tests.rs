//! End-to-end tests for `glovebox layout` commands.

mod fixtures;

use fixtures::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn glovebox_bin() -> &'static str {
    env!("CARGO_BIN_EXE_glovebox")
}

#[test]
fn layout_compile_writes_keymap_and_conf() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let layout_path = write_layout(work.path(), "minimal", &minimal_layout());
    let out_dir = work.path().join("out");

    let output = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "compile",
            layout_path.to_str().unwrap(),
            "--profile",
            "test/default",
            "--output",
            out_dir.to_str().unwrap(),
            "--no-timestamps",
        ])
        .output()
        .expect("failed to execute glovebox");

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let keymap = fs::read_to_string(out_dir.join("minimal.keymap")).unwrap();
    assert_eq!(keymap.matches("&kp Q").count(), 1);
    let conf = fs::read_to_string(out_dir.join("minimal.conf")).unwrap();
    assert!(conf.contains("CONFIG_ZMK_KEYBOARD_NAME=\"Test\""));
}

#[test]
fn layout_compile_unknown_keyboard_lists_alternatives() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let mut layout = minimal_layout();
    layout.keyboard = "missing".to_string();
    let layout_path = write_layout(work.path(), "missing", &layout);

    let output = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args(["layout", "compile", layout_path.to_str().unwrap()])
        .output()
        .expect("failed to execute glovebox");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"));
    assert!(stderr.contains("glove80"));
}

#[test]
fn layout_compile_undefined_variable_is_operational_failure() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let mut layout = minimal_layout();
    layout.notes = Some("${nope}".to_string());
    let layout_path = write_layout(work.path(), "broken", &layout);

    let output = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "compile",
            layout_path.to_str().unwrap(),
            "--profile",
            "test/default",
        ])
        .output()
        .expect("failed to execute glovebox");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope"));
}

#[test]
fn layout_compile_json_output_mirrors_result_record() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let layout_path = write_layout(work.path(), "minimal", &minimal_layout());
    let out_dir = work.path().join("out");

    let output = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "compile",
            layout_path.to_str().unwrap(),
            "--profile",
            "test/default",
            "--output",
            out_dir.to_str().unwrap(),
            "--output-format",
            "json",
        ])
        .output()
        .expect("failed to execute glovebox");

    assert_eq!(output.status.code(), Some(0));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(parsed["success"], serde_json::json!(true));
    assert_eq!(parsed["layer_count"], serde_json::json!(1));
    assert_eq!(parsed["profile_name"], serde_json::json!("test/default"));
}

#[test]
fn layout_parse_round_trips_compiled_keymap() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let mut layout = rich_layout();
    layout.keyboard = "glove80".to_string();
    let layout_path = write_layout(work.path(), "rich", &layout);
    let out_dir = work.path().join("out");

    let compile = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "compile",
            layout_path.to_str().unwrap(),
            "--profile",
            "glove80/v25",
            "--output",
            out_dir.to_str().unwrap(),
            "--no-timestamps",
        ])
        .output()
        .expect("failed to execute glovebox");
    assert_eq!(
        compile.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&compile.stderr)
    );

    let parsed_path = work.path().join("parsed.json");
    let parse = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "parse",
            out_dir.join("rich.keymap").to_str().unwrap(),
            "--profile",
            "glove80/v25",
            "--mode",
            "full",
            "--method",
            "ast",
            "--output",
            parsed_path.to_str().unwrap(),
        ])
        .output()
        .expect("failed to execute glovebox");
    assert_eq!(
        parse.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&parse.stderr)
    );

    let recovered = glovebox::models::LayoutData::load(&parsed_path).unwrap();
    assert_eq!(recovered.layer_names, layout.layer_names);
    assert_eq!(recovered.layers, layout.layers);
    assert_eq!(recovered.hold_taps, layout.hold_taps);
    assert_eq!(recovered.combos, layout.combos);
}

#[test]
fn layout_diff_and_patch_round_trip_through_files() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let base = rich_layout();
    let mut modified = base.clone();
    modified.layers[0][0] = glovebox::models::LayoutBinding::with_words("&kp", &["A"]);

    let base_path = write_layout(work.path(), "base", &base);
    let modified_path = write_layout(work.path(), "modified", &modified);

    let diff = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "diff",
            base_path.to_str().unwrap(),
            modified_path.to_str().unwrap(),
            "--format",
            "json",
        ])
        .output()
        .expect("failed to execute glovebox");
    assert_eq!(diff.status.code(), Some(0));

    let patch_path = work.path().join("patch.json");
    fs::write(&patch_path, &diff.stdout).unwrap();

    let patched_path = work.path().join("patched.json");
    let patch = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "patch",
            base_path.to_str().unwrap(),
            patch_path.to_str().unwrap(),
            "--output",
            patched_path.to_str().unwrap(),
        ])
        .output()
        .expect("failed to execute glovebox");
    assert_eq!(
        patch.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&patch.stderr)
    );

    let patched = glovebox::models::LayoutData::load(&patched_path).unwrap();
    assert_eq!(patched, modified);
}

#[test]
fn layout_diff_summary_mentions_changed_layer() {
    let keyboards = keyboard_dir();
    let work = TempDir::new().unwrap();
    let base = rich_layout();
    let mut modified = base.clone();
    modified.layers[1][0] = glovebox::models::LayoutBinding::with_words("&kp", &["TAB"]);

    let base_path = write_layout(work.path(), "base", &base);
    let modified_path = write_layout(work.path(), "modified", &modified);

    let output = Command::new(glovebox_bin())
        .env("GLOVEBOX_KEYBOARD_PATH", keyboards.path())
        .args([
            "layout",
            "diff",
            base_path.to_str().unwrap(),
            modified_path.to_str().unwrap(),
        ])
        .output()
        .expect("failed to execute glovebox");

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("modified 1 layers"));
}

#[test]
fn unknown_subcommand_is_misuse() {
    let output = Command::new(glovebox_bin())
        .args(["layout", "explode"])
        .output()
        .expect("failed to execute glovebox");
    assert_eq!(output.status.code(), Some(2));
}
