//! Kconfig `.conf` fragment generation.
//!
//! The fragment concatenates keyboard-level options, firmware-level
//! overrides, feature toggles derived from profile predicates, and
//! user-supplied overrides from the layout document. Output lines are
//! stable-sorted by option name.

use crate::error::Result;
use crate::models::{ConfigParameter, KConfigType};
use crate::profile::KeyboardProfile;
use serde_json::Value;
use std::collections::BTreeMap;

/// Renders one Kconfig value: booleans as `y`/`n`, strings quoted, ints bare.
fn render_value(option_type: KConfigType, value: &Value) -> Option<String> {
    match (option_type, value) {
        (KConfigType::Bool, Value::Bool(b)) => Some(if *b { "y" } else { "n" }.to_string()),
        (KConfigType::Bool, Value::String(s)) => match s.as_str() {
            "y" | "true" => Some("y".to_string()),
            "n" | "false" => Some("n".to_string()),
            _ => None,
        },
        (KConfigType::Int, Value::Number(n)) => Some(n.to_string()),
        (KConfigType::String, Value::String(s)) => Some(format!("\"{s}\"")),
        (KConfigType::String, Value::Number(n)) => Some(format!("\"{n}\"")),
        _ => None,
    }
}

/// Infers rendering for user overrides that have no catalog entry.
fn render_untyped(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(if *b { "y" } else { "n" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(format!("\"{s}\"")),
        _ => None,
    }
}

/// Generates the `.conf` text for a profile and the layout's overrides.
pub fn generate_conf(profile: &KeyboardProfile, overrides: &[ConfigParameter]) -> Result<String> {
    let mut lines: BTreeMap<String, String> = BTreeMap::new();

    // Keyboard options and firmware overrides, already merged by the profile.
    for (name, option) in profile.kconfig_options() {
        if option.default.is_null() {
            continue;
        }
        if let Some(rendered) = render_value(option.option_type, &option.default) {
            lines.insert(name, rendered);
        }
    }

    // Feature toggles derived from profile predicates.
    if profile.has_display() {
        lines.insert("CONFIG_ZMK_DISPLAY".to_string(), "y".to_string());
    }
    if profile.has_rgb() {
        lines.insert("CONFIG_ZMK_RGB_UNDERGLOW".to_string(), "y".to_string());
    }

    // User overrides win over everything above.
    let catalog = profile.kconfig_options();
    for param in overrides {
        let rendered = match catalog.get(&param.param_name) {
            Some(option) => render_value(option.option_type, &param.value),
            None => render_untyped(&param.value),
        };
        if let Some(rendered) = rendered {
            lines.insert(param.param_name.clone(), rendered);
        } else {
            tracing::warn!(
                "skipping config parameter '{}' with unsupported value {}",
                param.param_name,
                param.value
            );
        }
    }

    let mut out = String::new();
    for (name, value) in &lines {
        out.push_str(&format!("{name}={value}\n"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyboardConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn profile_with_options() -> KeyboardProfile {
        let config: KeyboardConfig = serde_yml::from_str(
            r#"
keyboard: test
key_count: 2
keymap:
  kconfig_options:
    CONFIG_ZMK_KEYBOARD_NAME:
      type: string
      default: "Test"
    CONFIG_ZMK_SLEEP:
      type: bool
      default: true
    CONFIG_ZMK_IDLE_TIMEOUT:
      type: int
      default: 30000
firmwares:
  default:
    version: v1
    build_options:
      repository: zmkfirmware/zmk
      branch: main
"#,
        )
        .unwrap();
        KeyboardProfile::new(Arc::new(config), Some("default")).unwrap()
    }

    #[test]
    fn test_conf_rendering_by_type() {
        let conf = generate_conf(&profile_with_options(), &[]).unwrap();
        assert!(conf.contains("CONFIG_ZMK_KEYBOARD_NAME=\"Test\"\n"));
        assert!(conf.contains("CONFIG_ZMK_SLEEP=y\n"));
        assert!(conf.contains("CONFIG_ZMK_IDLE_TIMEOUT=30000\n"));
    }

    #[test]
    fn test_conf_sorted_by_name() {
        let conf = generate_conf(&profile_with_options(), &[]).unwrap();
        let names: Vec<&str> = conf
            .lines()
            .map(|l| l.split('=').next().unwrap())
            .collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_user_override_wins() {
        let overrides = vec![ConfigParameter {
            param_name: "CONFIG_ZMK_SLEEP".to_string(),
            value: json!(false),
            description: None,
        }];
        let conf = generate_conf(&profile_with_options(), &overrides).unwrap();
        assert!(conf.contains("CONFIG_ZMK_SLEEP=n\n"));
    }

    #[test]
    fn test_untyped_override() {
        let overrides = vec![ConfigParameter {
            param_name: "CONFIG_ZMK_CUSTOM".to_string(),
            value: json!(7),
            description: None,
        }];
        let conf = generate_conf(&profile_with_options(), &overrides).unwrap();
        assert!(conf.contains("CONFIG_ZMK_CUSTOM=7\n"));
    }
}
