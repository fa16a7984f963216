//! Shared test fixtures for integration tests.
#![allow(dead_code)] // Some fixtures are used by only a subset of test files

use glovebox::models::{
    ComboBehavior, HoldTapBehavior, IntValue, KeyboardConfig, LayoutBinding, LayoutData,
    MacroBehavior,
};
use glovebox::profile::KeyboardProfile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Descriptor YAML for a small two-key test keyboard with one firmware.
pub const TEST_KEYBOARD_YAML: &str = r##"
keyboard: test
description: Two-key test board
vendor: Example
key_count: 2
flash:
  device_query: vendor=Adafruit and serial~=TEST-.*
compile_methods:
  - method_type: zmk_config
    image: zmkfirmware/zmk-build-arm:stable
    board_targets:
      - nice_nano_v2
keymap:
  includes:
    - "#include <dt-bindings/zmk/keys.h>"
  keymap_dtsi: "<<{{ keymap_node }}>>"
  kconfig_options:
    CONFIG_ZMK_KEYBOARD_NAME:
      type: string
      default: "Test"
firmwares:
  default:
    version: default
    description: stock firmware
    build_options:
      repository: zmkfirmware/zmk
      branch: main
"##;

/// Split glove80-style descriptor without a template (default template used).
pub const GLOVE_KEYBOARD_YAML: &str = r#"
keyboard: glove80
description: Split 80-key board
vendor: MoErgo
key_count: 80
flash:
  device_query: vendor=Adafruit and serial~=GLV80-.*
compile_methods:
  - method_type: zmk_config
    image: zmkfirmware/zmk-build-arm:stable
    board_targets:
      - glove80_lh
      - glove80_rh
firmwares:
  v25:
    version: v25
    description: stock firmware
    build_options:
      repository: moergo-sc/zmk
      branch: main
"#;

/// Writes descriptors into a fresh directory, returning it for use as a
/// keyboard search path.
pub fn keyboard_dir() -> TempDir {
    let dir = TempDir::new().expect("create keyboard dir");
    std::fs::write(dir.path().join("test.yaml"), TEST_KEYBOARD_YAML).unwrap();
    std::fs::write(dir.path().join("glove80.yaml"), GLOVE_KEYBOARD_YAML).unwrap();
    dir
}

pub fn test_profile() -> KeyboardProfile {
    let config: KeyboardConfig = serde_yml::from_str(TEST_KEYBOARD_YAML).unwrap();
    KeyboardProfile::new(Arc::new(config), Some("default")).unwrap()
}

pub fn glove_profile() -> KeyboardProfile {
    let config: KeyboardConfig = serde_yml::from_str(GLOVE_KEYBOARD_YAML).unwrap();
    KeyboardProfile::new(Arc::new(config), Some("v25")).unwrap()
}

/// Minimal single-layer layout: one `&kp Q` binding.
pub fn minimal_layout() -> LayoutData {
    let mut layout = LayoutData::new("test", "Minimal");
    layout.layer_names = vec!["base".to_string()];
    layout.layers = vec![vec![LayoutBinding::with_words("&kp", &["Q"])]];
    layout
}

/// Layout exercising every behavior collection.
pub fn rich_layout() -> LayoutData {
    let mut layout = LayoutData::new("test", "Rich");
    layout.layer_names = vec!["base".to_string(), "nav".to_string()];
    layout.layers = vec![
        vec![
            LayoutBinding::with_words("&kp", &["Q"]),
            LayoutBinding::with_words("&mt", &["LSHIFT", "A"]),
        ],
        vec![
            LayoutBinding::new("&trans"),
            LayoutBinding::with_words("&kp", &["ESC"]),
        ],
    ];
    layout.hold_taps.push(HoldTapBehavior {
        name: "hm".to_string(),
        description: None,
        bindings: vec!["&kp".to_string(), "&kp".to_string()],
        tapping_term_ms: Some(IntValue::Int(280)),
        quick_tap_ms: Some(IntValue::Int(150)),
        require_prior_idle_ms: None,
        flavor: Some("balanced".to_string()),
        hold_trigger_key_positions: vec![0, 1],
        hold_trigger_on_release: false,
        retro_tap: false,
    });
    layout.combos.push(ComboBehavior {
        name: "combo_esc".to_string(),
        description: None,
        timeout_ms: Some(IntValue::Int(50)),
        key_positions: vec![0, 1],
        layers: vec!["base".to_string()],
        binding: LayoutBinding::with_words("&kp", &["ESC"]),
    });
    layout.macros.push(MacroBehavior {
        name: "greet".to_string(),
        description: None,
        wait_ms: Some(IntValue::Int(40)),
        tap_ms: Some(IntValue::Int(40)),
        bindings: vec![
            LayoutBinding::with_words("&kp", &["H"]),
            LayoutBinding::with_words("&kp", &["I"]),
        ],
    });
    layout
}

/// Writes a layout document to `<dir>/<name>.json` and returns the path.
pub fn write_layout(dir: &Path, name: &str, layout: &LayoutData) -> PathBuf {
    let path = dir.join(format!("{name}.json"));
    layout.save(&path).expect("save layout");
    path
}

/// Populates a directory shaped like a complete west workspace.
pub fn populate_workspace(root: &Path) {
    for component in ["zmk", "zephyr", "modules", ".west"] {
        let dir = root.join(component);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("marker"), component).unwrap();
    }
}
