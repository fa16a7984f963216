//! Keyboard profile resolution.
//!
//! A profile is the pair of a fully merged keyboard descriptor and a selected
//! firmware. Descriptors are searched on an ordered path list, decoded from
//! YAML, and run through a single parent-inheritance pass so that downstream
//! code never sees the chain.

use crate::constants::KEYBOARD_PATH_ENV;
use crate::error::{Error, Result};
use crate::models::{FirmwareConfig, KConfigOption, KeyboardConfig, SystemBehavior};
use serde_yml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Resolved profile: keyboard descriptor plus an optional firmware selection.
///
/// A profile without a firmware is valid for display and layout editing but
/// not for firmware compilation. Profiles are cheap-to-clone value objects.
#[derive(Debug, Clone)]
pub struct KeyboardProfile {
    pub keyboard_config: Arc<KeyboardConfig>,
    pub firmware_version: Option<String>,
    pub firmware_config: Option<FirmwareConfig>,
}

impl KeyboardProfile {
    /// Builds a profile, validating the firmware selection.
    pub fn new(keyboard_config: Arc<KeyboardConfig>, firmware: Option<&str>) -> Result<Self> {
        let (firmware_version, firmware_config) = match firmware {
            Some(version) => {
                let config = keyboard_config.firmwares.get(version).cloned().ok_or_else(|| {
                    Error::FirmwareNotFound {
                        keyboard: keyboard_config.keyboard.clone(),
                        firmware: version.to_string(),
                    }
                })?;
                (Some(version.to_string()), Some(config))
            }
            None => (None, None),
        };
        Ok(Self {
            keyboard_config,
            firmware_version,
            firmware_config,
        })
    }

    #[must_use]
    pub fn keyboard_name(&self) -> &str {
        &self.keyboard_config.keyboard
    }

    /// `keyboard/firmware` identifier, or the bare keyboard name.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.firmware_version {
            Some(fw) => format!("{}/{fw}", self.keyboard_config.keyboard),
            None => self.keyboard_config.keyboard.clone(),
        }
    }

    /// True when the profile can drive a firmware compilation.
    #[must_use]
    pub fn has_firmware(&self) -> bool {
        self.firmware_config.is_some()
    }

    /// System behavior catalog from the descriptor.
    #[must_use]
    pub fn system_behaviors(&self) -> &[SystemBehavior] {
        &self.keyboard_config.keymap.system_behaviors
    }

    /// Combined Kconfig options: keyboard-level entries with firmware-level
    /// overrides applied on top (firmware wins per name).
    #[must_use]
    pub fn kconfig_options(&self) -> BTreeMap<String, KConfigOption> {
        let mut combined = self.keyboard_config.keymap.kconfig_options.clone();
        if let Some(firmware) = &self.firmware_config {
            for (name, option) in &firmware.kconfig {
                combined.insert(name.clone(), option.clone());
            }
        }
        combined
    }

    fn has_kconfig(&self, name: &str) -> bool {
        self.kconfig_options().contains_key(name)
    }

    /// True for split keyboards: any compile method lists lh/rh board pairs.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.keyboard_config.compile_methods.iter().any(|m| {
            let has = |needle: &str| m.board_targets.iter().any(|b| b.contains(needle));
            (has("_lh") || has("left")) && (has("_rh") || has("right"))
        })
    }

    #[must_use]
    pub fn has_rgb(&self) -> bool {
        self.has_kconfig("CONFIG_ZMK_RGB_UNDERGLOW")
    }

    #[must_use]
    pub fn has_display(&self) -> bool {
        self.has_kconfig("CONFIG_ZMK_DISPLAY")
    }

    /// Keymap template text, if the descriptor carries one.
    #[must_use]
    pub fn keymap_template(&self) -> Option<&str> {
        self.keyboard_config.keymap.keymap_dtsi.as_deref()
    }
}

/// Loads and caches keyboard descriptors from the search path.
///
/// The cache is process-local; it is cleared when the user configuration is
/// reloaded (search paths may have changed).
pub struct ProfileLoader {
    search_paths: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Arc<KeyboardConfig>>>,
}

impl ProfileLoader {
    /// Builds the ordered search-path list:
    ///
    /// 1. built-in keyboards directory (next to the binary)
    /// 2. `<config_dir>/glovebox/keyboards`
    /// 3. entries from `GLOVEBOX_KEYBOARD_PATH` (colon-separated)
    /// 4. paths injected via user config
    #[must_use]
    pub fn new(extra_paths: &[PathBuf]) -> Self {
        let mut paths = Vec::new();

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                paths.push(dir.join("keyboards"));
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("glovebox").join("keyboards"));
        }
        if let Ok(env_paths) = std::env::var(KEYBOARD_PATH_ENV) {
            for entry in env_paths.split(':').filter(|p| !p.is_empty()) {
                paths.push(PathBuf::from(entry));
            }
        }
        paths.extend_from_slice(extra_paths);

        let search_paths = paths.into_iter().filter(|p| p.is_dir()).collect();
        tracing::debug!(?search_paths, "keyboard descriptor search paths");

        Self {
            search_paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loader with an explicit path list, used by tests and user config.
    #[must_use]
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths: paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Clears the descriptor cache.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("profile cache poisoned").clear();
    }

    fn find_descriptor_file(&self, keyboard: &str) -> Option<PathBuf> {
        for path in &self.search_paths {
            for ext in ["yaml", "yml"] {
                let candidate = path.join(format!("{keyboard}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Loads a fully merged keyboard descriptor by name.
    pub fn load_keyboard(&self, keyboard: &str) -> Result<Arc<KeyboardConfig>> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("profile cache poisoned")
            .get(keyboard)
        {
            return Ok(Arc::clone(cached));
        }

        let mut visited = HashSet::new();
        let merged = self.load_merged_value(keyboard, &mut visited)?;

        let mut config: KeyboardConfig =
            serde_yml::from_value(merged).map_err(|e| Error::ProfileInvalid {
                keyboard: keyboard.to_string(),
                message: e.to_string(),
            })?;

        // The filename is authoritative for the keyboard id.
        if config.keyboard != keyboard {
            tracing::warn!(
                "keyboard name mismatch: descriptor says '{}', file is '{keyboard}'",
                config.keyboard
            );
            config.keyboard = keyboard.to_string();
        }
        // Inheritance is resolved; do not re-expose the chain.
        config.parent = None;

        self.load_template_file(keyboard, &mut config)?;

        let config = Arc::new(config);
        self.cache
            .lock()
            .expect("profile cache poisoned")
            .insert(keyboard.to_string(), Arc::clone(&config));
        tracing::info!("loaded keyboard descriptor: {keyboard}");
        Ok(config)
    }

    /// Loads raw YAML and merges parent descriptors, child winning per leaf.
    fn load_merged_value(&self, keyboard: &str, visited: &mut HashSet<String>) -> Result<Value> {
        if !visited.insert(keyboard.to_string()) {
            return Err(Error::ProfileInvalid {
                keyboard: keyboard.to_string(),
                message: "parent inheritance cycle".to_string(),
            });
        }

        let file = self
            .find_descriptor_file(keyboard)
            .ok_or_else(|| Error::ProfileNotFound {
                keyboard: keyboard.to_string(),
            })?;
        let content = std::fs::read_to_string(&file)
            .map_err(|e| Error::io(format!("failed to read {}", file.display()), e))?;
        let child: Value = serde_yml::from_str(&content).map_err(|e| Error::ProfileInvalid {
            keyboard: keyboard.to_string(),
            message: e.to_string(),
        })?;

        let parent_name = child
            .as_mapping()
            .and_then(|m| m.get("parent"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match parent_name {
            Some(parent) => {
                let base = self.load_merged_value(&parent, visited)?;
                Ok(deep_merge(base, child))
            }
            None => Ok(child),
        }
    }

    /// Inlines `keymap_dtsi_file` content when no inline template is present.
    fn load_template_file(&self, keyboard: &str, config: &mut KeyboardConfig) -> Result<()> {
        if config.keymap.keymap_dtsi.is_some() {
            return Ok(());
        }
        let Some(rel) = config.keymap.keymap_dtsi_file.clone() else {
            return Ok(());
        };
        let descriptor = self
            .find_descriptor_file(keyboard)
            .ok_or_else(|| Error::ProfileNotFound {
                keyboard: keyboard.to_string(),
            })?;
        let template_path = descriptor
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&rel);
        let content = std::fs::read_to_string(&template_path).map_err(|e| {
            Error::io(
                format!("failed to read template {}", template_path.display()),
                e,
            )
        })?;
        config.keymap.keymap_dtsi = Some(content);
        Ok(())
    }

    /// Creates a profile. Without an explicit firmware the first entry in
    /// alphabetical order is selected; a keyboard with no firmwares yields a
    /// keyboard-only profile.
    pub fn create_profile(
        &self,
        keyboard: &str,
        firmware: Option<&str>,
    ) -> Result<KeyboardProfile> {
        let config = self.load_keyboard(keyboard)?;
        let selected = match firmware {
            Some(fw) => Some(fw.to_string()),
            None => config.firmwares.keys().next().cloned(),
        };
        KeyboardProfile::new(config, selected.as_deref())
    }

    /// All keyboard names discoverable on the search path, sorted.
    #[must_use]
    pub fn list_keyboards(&self) -> Vec<String> {
        let mut names = HashSet::new();
        for path in &self.search_paths {
            let Ok(entries) = std::fs::read_dir(path) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_yaml = path
                    .extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml");
                if is_yaml {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.insert(stem.to_string());
                    }
                }
            }
        }
        let mut sorted: Vec<String> = names.into_iter().collect();
        sorted.sort();
        sorted
    }

    /// Firmware names available for a keyboard, sorted.
    pub fn list_firmwares(&self, keyboard: &str) -> Result<Vec<String>> {
        let config = self.load_keyboard(keyboard)?;
        Ok(config.firmwares.keys().cloned().collect())
    }
}

/// Deep merge: mappings merge recursively with the child winning per leaf
/// key; every other value kind is replaced wholesale by the child.
fn deep_merge(base: Value, child: Value) -> Value {
    match (base, child) {
        (Value::Mapping(mut base_map), Value::Mapping(child_map)) => {
            for (key, child_value) in child_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, child_value),
                    None => child_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, child) => child,
    }
}

/// Parses a `KEYBOARD[/FIRMWARE]` profile argument.
#[must_use]
pub fn parse_profile_arg(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('/') {
        Some((kb, fw)) if !fw.is_empty() => (kb, Some(fw)),
        Some((kb, _)) => (kb, None),
        None => (arg, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_descriptor(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(format!("{name}.yaml")), content).unwrap();
    }

    fn basic_descriptor() -> &'static str {
        r#"
keyboard: test
description: Test board
vendor: Example
key_count: 4
keymap:
  kconfig_options:
    CONFIG_ZMK_KEYBOARD_NAME:
      type: string
      default: "Test"
firmwares:
  v25:
    version: v25
    description: stock
    build_options:
      repository: zmkfirmware/zmk
      branch: main
  beta:
    version: beta
    description: beta
    build_options:
      repository: zmkfirmware/zmk
      branch: beta
    kconfig:
      CONFIG_ZMK_KEYBOARD_NAME:
        type: string
        default: "Test Beta"
"#
    }

    #[test]
    fn test_profile_not_found() {
        let dir = TempDir::new().unwrap();
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);
        let err = loader.load_keyboard("missing").unwrap_err();
        assert_eq!(err.kind(), "profile_not_found");
    }

    #[test]
    fn test_load_and_cache() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "test", basic_descriptor());
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let first = loader.load_keyboard("test").unwrap();
        let second = loader.load_keyboard("test").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.key_count, 4);
    }

    #[test]
    fn test_default_firmware_is_first_alphabetically() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "test", basic_descriptor());
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let profile = loader.create_profile("test", None).unwrap();
        assert_eq!(profile.firmware_version.as_deref(), Some("beta"));
    }

    #[test]
    fn test_firmware_not_found() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "test", basic_descriptor());
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let err = loader.create_profile("test", Some("nope")).unwrap_err();
        assert_eq!(err.kind(), "firmware_not_found");
    }

    #[test]
    fn test_keyboard_only_profile() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "bare", "keyboard: bare\nkey_count: 2\n");
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let profile = loader.create_profile("bare", None).unwrap();
        assert!(!profile.has_firmware());
        assert_eq!(profile.name(), "bare");
    }

    #[test]
    fn test_firmware_kconfig_overrides_keyboard() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "test", basic_descriptor());
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let profile = loader.create_profile("test", Some("beta")).unwrap();
        let options = profile.kconfig_options();
        assert_eq!(
            options["CONFIG_ZMK_KEYBOARD_NAME"].default,
            serde_json::json!("Test Beta")
        );
    }

    #[test]
    fn test_parent_inheritance_child_wins() {
        let dir = TempDir::new().unwrap();
        write_descriptor(
            dir.path(),
            "base_kb",
            r#"
keyboard: base_kb
vendor: Example
key_count: 80
keymap:
  kconfig_options:
    CONFIG_ZMK_SLEEP:
      type: bool
      default: true
"#,
        );
        write_descriptor(
            dir.path(),
            "child_kb",
            r#"
keyboard: child_kb
parent: base_kb
key_count: 42
"#,
        );
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let config = loader.load_keyboard("child_kb").unwrap();
        assert_eq!(config.key_count, 42);
        assert_eq!(config.vendor, "Example");
        assert!(config.keymap.kconfig_options.contains_key("CONFIG_ZMK_SLEEP"));
        assert!(config.parent.is_none());
    }

    #[test]
    fn test_parent_cycle_detected() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "a_kb", "keyboard: a_kb\nparent: b_kb\n");
        write_descriptor(dir.path(), "b_kb", "keyboard: b_kb\nparent: a_kb\n");
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let err = loader.load_keyboard("a_kb").unwrap_err();
        assert_eq!(err.kind(), "profile_invalid");
    }

    #[test]
    fn test_yaml_preferred_over_yml() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "dup", "keyboard: dup\nkey_count: 1\n");
        fs::write(dir.path().join("dup.yml"), "keyboard: dup\nkey_count: 2\n").unwrap();
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);

        let config = loader.load_keyboard("dup").unwrap();
        assert_eq!(config.key_count, 1);
    }

    #[test]
    fn test_list_keyboards_sorted() {
        let dir = TempDir::new().unwrap();
        write_descriptor(dir.path(), "zeta", "keyboard: zeta\n");
        write_descriptor(dir.path(), "alpha", "keyboard: alpha\n");
        let loader = ProfileLoader::with_paths(vec![dir.path().to_path_buf()]);
        assert_eq!(loader.list_keyboards(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_parse_profile_arg() {
        assert_eq!(parse_profile_arg("glove80/v25.05"), ("glove80", Some("v25.05")));
        assert_eq!(parse_profile_arg("glove80"), ("glove80", None));
        assert_eq!(parse_profile_arg("glove80/"), ("glove80", None));
    }
}
