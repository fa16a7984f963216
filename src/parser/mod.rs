//! `.keymap` parsing back into layout documents.
//!
//! Two strategies, selected automatically or explicitly: `template` mode
//! matches the keyboard's template regions and extracts only user data;
//! `full` mode parses the entire file without templating assumptions. Two
//! backends emit the same document shape; the AST backend is authoritative.

pub mod ast;
pub mod regex_backend;
mod template;

use crate::error::{Error, Result};
use crate::models::{
    ComboBehavior, HoldTapBehavior, InputListener, InputListenerNode, IntValue, LayoutBinding,
    LayoutData, MacroBehavior,
};
use crate::profile::KeyboardProfile;
use ast::{Cell, DtDocument, DtNode, PropertyValue};

/// Parse strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// `template` when a profile with a template is available, else `full`.
    #[default]
    Auto,
    Full,
    Template,
}

/// Parse backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseBackend {
    /// Structural devicetree parse (authoritative).
    #[default]
    Ast,
    /// Legacy regex extraction, kept for compatibility.
    Regex,
}

impl std::str::FromStr for ParseMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "full" => Ok(Self::Full),
            "template" => Ok(Self::Template),
            other => Err(format!("unknown parse mode '{other}'")),
        }
    }
}

impl std::str::FromStr for ParseBackend {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ast" => Ok(Self::Ast),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown parse method '{other}'")),
        }
    }
}

/// Parses `.keymap` text into a layout document.
///
/// `template` mode requires a profile; requesting it without one is an error.
pub fn parse_keymap(
    content: &str,
    profile: Option<&KeyboardProfile>,
    mode: ParseMode,
    backend: ParseBackend,
) -> Result<LayoutData> {
    let effective_mode = match mode {
        ParseMode::Auto => match profile {
            Some(p) if p.keymap_template().is_some() => ParseMode::Template,
            _ => ParseMode::Full,
        },
        ParseMode::Template if profile.is_none() => {
            return Err(Error::ParseFailed {
                line: 0,
                message: "template mode requires a keyboard profile".to_string(),
            });
        }
        other => other,
    };

    let keyboard = profile.map_or("unknown", KeyboardProfile::keyboard_name);

    let mut layout = match backend {
        ParseBackend::Ast => {
            let doc = ast::parse_dt(content)?;
            let mut layout = document_to_layout(&doc, keyboard)?;
            if effective_mode == ParseMode::Template {
                // Profile presence was checked above.
                let profile = profile.expect("template mode without profile");
                layout.custom_devicetree = template::extract_custom_devicetree(&doc, profile);
            } else {
                layout.custom_devicetree = template::collect_unrecognized_nodes(&doc)
                    .unwrap_or_default();
            }
            layout
        }
        ParseBackend::Regex => regex_backend::parse(content, keyboard)?,
    };

    layout.title = format!("Imported {keyboard} layout");
    layout.validate()?;
    Ok(layout)
}

fn first_int(node: &DtNode, property: &str) -> Option<IntValue> {
    node.cells_property(property).and_then(|cells| {
        cells.iter().find_map(|c| match c {
            Cell::Number(n) => Some(IntValue::Int(*n)),
            Cell::Word(_) => None,
        })
    })
}

fn cell_numbers(node: &DtNode, property: &str) -> Vec<i64> {
    node.cells_property(property)
        .map(|cells| {
            cells
                .iter()
                .filter_map(|c| match c {
                    Cell::Number(n) => Some(*n),
                    Cell::Word(_) => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses a flat cell sequence into bindings: a `&`-word starts a new
/// binding, everything else becomes a parameter of the current one.
pub(crate) fn cells_to_bindings(cells: &[Cell], line: usize) -> Result<Vec<LayoutBinding>> {
    let mut bindings: Vec<LayoutBinding> = Vec::new();
    for cell in cells {
        match cell {
            Cell::Word(word) if word.starts_with('&') => {
                bindings.push(LayoutBinding::new(word.clone()));
            }
            Cell::Word(word) => {
                let Some(current) = bindings.last_mut() else {
                    return Err(Error::ParseFailed {
                        line,
                        message: format!("parameter '{word}' before any behavior reference"),
                    });
                };
                current
                    .params
                    .push(crate::models::BindingParam::Word(word.clone()));
            }
            Cell::Number(n) => {
                let Some(current) = bindings.last_mut() else {
                    return Err(Error::ParseFailed {
                        line,
                        message: format!("parameter '{n}' before any behavior reference"),
                    });
                };
                current.params.push(crate::models::BindingParam::Number(*n));
            }
        }
    }
    Ok(bindings)
}

fn node_behavior_name(node: &DtNode) -> String {
    node.label.clone().unwrap_or_else(|| node.name.clone())
}

fn extract_hold_taps(doc: &DtDocument) -> Result<Vec<HoldTapBehavior>> {
    let mut hold_taps = Vec::new();
    for node in doc.find_compatible("zmk,behavior-hold-tap") {
        let bindings = match node.property("bindings") {
            Some(PropertyValue::CellGroups(groups)) => groups
                .iter()
                .filter_map(|group| {
                    group.iter().find_map(|c| match c {
                        Cell::Word(w) if w.starts_with('&') => Some(w.clone()),
                        _ => None,
                    })
                })
                .collect(),
            _ => Vec::new(),
        };
        hold_taps.push(HoldTapBehavior {
            name: node_behavior_name(node),
            description: None,
            bindings,
            tapping_term_ms: first_int(node, "tapping-term-ms"),
            quick_tap_ms: first_int(node, "quick-tap-ms"),
            require_prior_idle_ms: first_int(node, "require-prior-idle-ms"),
            flavor: node.text_property("flavor").map(str::to_string),
            hold_trigger_key_positions: cell_numbers(node, "hold-trigger-key-positions")
                .iter()
                .filter_map(|&n| u32::try_from(n).ok())
                .collect(),
            hold_trigger_on_release: matches!(
                node.property("hold-trigger-on-release"),
                Some(PropertyValue::Flag)
            ),
            retro_tap: matches!(node.property("retro-tap"), Some(PropertyValue::Flag)),
        });
    }
    Ok(hold_taps)
}

fn extract_combos(doc: &DtDocument, layer_names: &[String]) -> Result<Vec<ComboBehavior>> {
    let mut combos = Vec::new();
    for combos_node in doc.find_compatible("zmk,combos") {
        for node in &combos_node.children {
            let key_positions: Vec<u32> = cell_numbers(node, "key-positions")
                .iter()
                .filter_map(|&n| u32::try_from(n).ok())
                .collect();
            let mut layers = Vec::new();
            for id in cell_numbers(node, "layers") {
                let idx = usize::try_from(id).ok();
                let name = idx.and_then(|i| layer_names.get(i));
                match name {
                    Some(name) => layers.push(name.clone()),
                    None => {
                        return Err(Error::ParseFailed {
                            line: node.line,
                            message: format!(
                                "combo '{}' references layer id {id} out of range",
                                node.name
                            ),
                        });
                    }
                }
            }
            let binding = node
                .cells_property("bindings")
                .map(|cells| cells_to_bindings(&cells, node.line))
                .transpose()?
                .and_then(|mut b| if b.is_empty() { None } else { Some(b.remove(0)) })
                .ok_or_else(|| Error::ParseFailed {
                    line: node.line,
                    message: format!("combo '{}' has no binding", node.name),
                })?;

            combos.push(ComboBehavior {
                name: node.name.clone(),
                description: None,
                timeout_ms: first_int(node, "timeout-ms"),
                key_positions,
                layers,
                binding,
            });
        }
    }
    Ok(combos)
}

fn extract_macros(doc: &DtDocument) -> Result<Vec<MacroBehavior>> {
    let mut macros = Vec::new();
    for node in doc.find_compatible("zmk,behavior-macro") {
        let mut bindings = Vec::new();
        if let Some(PropertyValue::CellGroups(groups)) = node.property("bindings") {
            for group in groups {
                bindings.extend(cells_to_bindings(group, node.line)?);
            }
        }
        macros.push(MacroBehavior {
            name: node_behavior_name(node),
            description: None,
            wait_ms: first_int(node, "wait-ms"),
            tap_ms: first_int(node, "tap-ms"),
            bindings,
        });
    }
    Ok(macros)
}

fn extract_input_listeners(doc: &DtDocument) -> Result<Vec<InputListener>> {
    let mut listeners = Vec::new();
    for node in &doc.nodes {
        if !node.name.starts_with('&') {
            continue;
        }
        let has_processors = node
            .children
            .iter()
            .any(|c| c.property("input-processors").is_some());
        if !has_processors {
            continue;
        }
        let mut nodes = Vec::new();
        for child in &node.children {
            let input_processors = child
                .cells_property("input-processors")
                .map(|cells| cells_to_bindings(&cells, child.line))
                .transpose()?
                .unwrap_or_default();
            nodes.push(InputListenerNode {
                code: child.name.clone(),
                description: None,
                layers: cell_numbers(child, "layers"),
                input_processors,
            });
        }
        listeners.push(InputListener {
            code: node.name.clone(),
            nodes,
        });
    }
    Ok(listeners)
}

/// Builds a layout document from a parsed devicetree.
fn document_to_layout(doc: &DtDocument, keyboard: &str) -> Result<LayoutData> {
    let mut layout = LayoutData::new(keyboard, String::new());

    let keymap_nodes = doc.find_compatible("zmk,keymap");
    let Some(keymap) = keymap_nodes.first() else {
        return Err(Error::ParseFailed {
            line: 0,
            message: "no keymap node (compatible = \"zmk,keymap\") found".to_string(),
        });
    };

    for layer_node in &keymap.children {
        let name = layer_node
            .text_property("display-name")
            .map(str::to_string)
            .unwrap_or_else(|| {
                layer_node
                    .name
                    .strip_prefix("layer_")
                    .unwrap_or(&layer_node.name)
                    .to_string()
            });
        let cells = layer_node
            .cells_property("bindings")
            .ok_or_else(|| Error::ParseFailed {
                line: layer_node.line,
                message: format!("layer '{name}' has no bindings property"),
            })?;
        let bindings = cells_to_bindings(&cells, layer_node.line)?;
        layout.layer_names.push(name);
        layout.layers.push(bindings);
    }

    if layout.layers.is_empty() {
        return Err(Error::ParseFailed {
            line: keymap.line,
            message: "keymap node contains no layers".to_string(),
        });
    }

    layout.hold_taps = extract_hold_taps(doc)?;
    layout.combos = extract_combos(doc, &layout.layer_names)?;
    layout.macros = extract_macros(doc)?;
    layout.input_listeners = extract_input_listeners(doc)?;

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{compile_layout, GeneratorOptions};
    use crate::models::KeyboardConfig;
    use std::sync::Arc;

    fn test_profile() -> KeyboardProfile {
        let config: KeyboardConfig = serde_yml::from_str(
            r"
keyboard: test
key_count: 4
firmwares:
  default:
    version: v1
    build_options:
      repository: zmkfirmware/zmk
      branch: main
",
        )
        .unwrap();
        KeyboardProfile::new(Arc::new(config), Some("default")).unwrap()
    }

    fn rich_layout() -> LayoutData {
        let mut layout = LayoutData::new("test", "Rich");
        layout.layer_names = vec!["base".to_string(), "nav".to_string()];
        layout.layers = vec![
            vec![
                LayoutBinding::with_words("&kp", &["Q"]),
                LayoutBinding::with_words("&mt", &["LSHIFT", "A"]),
            ],
            vec![LayoutBinding::new("&trans"), LayoutBinding::new("&trans")],
        ];
        layout.hold_taps.push(HoldTapBehavior {
            name: "hm".to_string(),
            description: None,
            bindings: vec!["&kp".to_string(), "&kp".to_string()],
            tapping_term_ms: Some(IntValue::Int(280)),
            quick_tap_ms: None,
            require_prior_idle_ms: None,
            flavor: Some("balanced".to_string()),
            hold_trigger_key_positions: vec![2, 3],
            hold_trigger_on_release: false,
            retro_tap: true,
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

    #[test]
    fn test_round_trip_through_default_template() {
        let profile = test_profile();
        let source = rich_layout();
        let compiled = compile_layout(
            &profile,
            &source,
            GeneratorOptions { timestamps: false },
        )
        .unwrap();

        let parsed = parse_keymap(
            &compiled.keymap,
            Some(&profile),
            ParseMode::Full,
            ParseBackend::Ast,
        )
        .unwrap();

        assert_eq!(parsed.layer_names, source.layer_names);
        assert_eq!(parsed.layers, source.layers);
        assert_eq!(parsed.hold_taps, source.hold_taps);
        assert_eq!(parsed.combos, source.combos);
        assert_eq!(parsed.macros, source.macros);
    }

    #[test]
    fn test_full_mode_without_profile() {
        let source = r#"
/ {
    keymap {
        compatible = "zmk,keymap";
        layer_base {
            bindings = <&kp Q &kp W>;
        };
    };
};
"#;
        let layout =
            parse_keymap(source, None, ParseMode::Auto, ParseBackend::Ast).unwrap();
        assert_eq!(layout.layer_names, vec!["base"]);
        assert_eq!(layout.layers[0].len(), 2);
    }

    #[test]
    fn test_template_mode_requires_profile() {
        let err = parse_keymap("", None, ParseMode::Template, ParseBackend::Ast).unwrap_err();
        assert_eq!(err.kind(), "parse_failed");
    }

    #[test]
    fn test_missing_keymap_node_fails() {
        let err = parse_keymap(
            "/ { behaviors { }; };",
            None,
            ParseMode::Full,
            ParseBackend::Ast,
        )
        .unwrap_err();
        assert!(err.to_string().contains("keymap"));
    }

    #[test]
    fn test_combo_layer_id_out_of_range() {
        let source = r#"
/ {
    keymap {
        compatible = "zmk,keymap";
        layer_base { bindings = <&kp Q>; };
    };
    combos {
        compatible = "zmk,combos";
        combo_bad {
            key-positions = <0 1>;
            layers = <9>;
            bindings = <&kp ESC>;
        };
    };
};
"#;
        let err =
            parse_keymap(source, None, ParseMode::Full, ParseBackend::Ast).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_parameter_before_behavior_fails() {
        let source = r#"
/ {
    keymap {
        compatible = "zmk,keymap";
        layer_base { bindings = <Q &kp W>; };
    };
};
"#;
        let err =
            parse_keymap(source, None, ParseMode::Full, ParseBackend::Ast).unwrap_err();
        assert_eq!(err.kind(), "parse_failed");
    }
}
