//! Keyboard and firmware descriptor models.
//!
//! Descriptors are YAML files discovered on the keyboard search path. A
//! descriptor may name a `parent` keyboard; inheritance is resolved by a
//! single deep-merge pass in the profile resolver, so code past that point
//! only ever sees a fully merged [`KeyboardConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kconfig option value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KConfigType {
    Bool,
    Int,
    String,
}

/// A single Kconfig option a keyboard or firmware exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KConfigOption {
    #[serde(rename = "type")]
    pub option_type: KConfigType,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A behavior provided by the firmware itself (not user-defined), e.g. `&kp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBehavior {
    /// Behavior reference including the `&` prefix.
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of parameters the behavior takes.
    #[serde(default)]
    pub expected_params: u32,
    /// Extra include file the behavior requires, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

/// Per-keyboard formatting rules for the generated keymap node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattingConfig {
    /// Spaces between adjacent binding cells.
    #[serde(default = "default_key_gap")]
    pub key_gap: usize,
    /// Indentation of each bindings row inside the layer node.
    #[serde(default = "default_base_indent")]
    pub base_indent: usize,
    /// Physical row structure: key positions per visual row. When absent,
    /// bindings are emitted one row per ten keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<u32>>>,
}

fn default_key_gap() -> usize {
    2
}

fn default_base_indent() -> usize {
    12
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            key_gap: default_key_gap(),
            base_indent: default_base_indent(),
            rows: None,
        }
    }
}

/// Regex patterns the progress state machine uses to classify build output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPatterns {
    #[serde(default = "default_repo_download")]
    pub repo_download_pattern: String,
    #[serde(default = "default_build_start")]
    pub build_start_pattern: String,
    #[serde(default = "default_build_progress")]
    pub build_progress_pattern: String,
    #[serde(default = "default_build_complete")]
    pub build_complete_pattern: String,
    #[serde(default = "default_board_detection")]
    pub board_detection_pattern: String,
    #[serde(default = "default_board_complete")]
    pub board_complete_pattern: String,
}

fn default_repo_download() -> String {
    r"^From https://\S+/(\S+)".to_string()
}

fn default_build_start() -> String {
    r"west build|Building zmk".to_string()
}

fn default_build_progress() -> String {
    r"\[(\d+)/(\d+)\]".to_string()
}

fn default_build_complete() -> String {
    r"Memory region\s+Used Size".to_string()
}

fn default_board_detection() -> String {
    r"-- Board:\s+(\S+)".to_string()
}

fn default_board_complete() -> String {
    r"Wrote \d+ bytes to zmk\.uf2".to_string()
}

impl Default for ProgressPatterns {
    fn default() -> Self {
        Self {
            repo_download_pattern: default_repo_download(),
            build_start_pattern: default_build_start(),
            build_progress_pattern: default_build_progress(),
            build_complete_pattern: default_build_complete(),
            board_detection_pattern: default_board_detection(),
            board_complete_pattern: default_board_complete(),
        }
    }
}

/// Keymap generation section of the keyboard descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KeymapSection {
    /// Include directives rendered at the top of the keymap.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Firmware-provided behavior catalog.
    #[serde(default)]
    pub system_behaviors: Vec<SystemBehavior>,
    /// Keyboard-level Kconfig catalog.
    #[serde(default)]
    pub kconfig_options: BTreeMap<String, KConfigOption>,
    /// Jinja template text for the final `.keymap` file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymap_dtsi: Option<String>,
    /// Alternative: path to a template file relative to the descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymap_dtsi_file: Option<String>,
    /// Key-position `#define` header emitted verbatim.
    #[serde(default)]
    pub key_position_header: String,
    /// System behaviors devicetree fragment emitted verbatim.
    #[serde(default)]
    pub system_behaviors_dts: String,
    #[serde(default)]
    pub formatting: FormattingConfig,
}

/// USB flash device matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlashConfig {
    /// Device query, e.g. `vendor=Adafruit and serial~=GLV80-.* and removable=1`.
    #[serde(default)]
    pub device_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_vid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_pid: Option<String>,
    /// Seconds to wait for a device to enumerate before giving up.
    #[serde(default = "default_flash_timeout")]
    pub timeout_secs: u64,
}

fn default_flash_timeout() -> u64 {
    60
}

/// One entry of the keyboard's `compile_methods` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileMethodConfig {
    /// Strategy name: `zmk_config` or `moergo`.
    pub method_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Default board list used when the repository has no build matrix.
    #[serde(default)]
    pub board_targets: Vec<String>,
}

/// Firmware build options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BuildOptions {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_commit: Option<String>,
}

/// A firmware variant of a keyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareConfig {
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub build_options: BuildOptions,
    /// Firmware-level Kconfig catalog; overrides same-named keyboard entries.
    #[serde(default)]
    pub kconfig: BTreeMap<String, KConfigOption>,
}

/// Complete keyboard descriptor after parent-inheritance resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardConfig {
    pub keyboard: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub key_count: u32,
    /// Keyboard id to inherit from; resolved away by the profile resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub compile_methods: Vec<CompileMethodConfig>,
    #[serde(default)]
    pub keymap: KeymapSection,
    #[serde(default)]
    pub firmwares: BTreeMap<String, FirmwareConfig>,
    #[serde(default)]
    pub progress_patterns: ProgressPatterns,
}
