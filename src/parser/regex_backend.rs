//! Legacy regex parse backend.
//!
//! Pattern extraction over the raw keymap text. Kept for compatibility with
//! files the structural parser rejects; the AST backend is authoritative
//! whenever the two disagree. Emits the same document shape, though input
//! listeners are beyond what the patterns can recover.

use super::ast::Cell;
use crate::error::{Error, Result};
use crate::models::{ComboBehavior, HoldTapBehavior, IntValue, LayoutData, MacroBehavior};
use regex::Regex;
use std::sync::OnceLock;

fn layer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)([A-Za-z0-9_]+)\s*\{\s*bindings\s*=\s*<(.*?)>\s*;(?:\s*display-name\s*=\s*"([^"]*)"\s*;)?"#,
        )
        .unwrap()
    })
}

fn hold_tap_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)([A-Za-z0-9_]+)\s*:\s*[A-Za-z0-9_]+\s*\{([^{}]*?compatible\s*=\s*"zmk,behavior-hold-tap"\s*;[^{}]*)\}"#,
        )
        .unwrap()
    })
}

fn macro_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)([A-Za-z0-9_]+)\s*:\s*[A-Za-z0-9_]+\s*\{([^{}]*?compatible\s*=\s*"zmk,behavior-macro"\s*;[^{}]*)\}"#,
        )
        .unwrap()
    })
}

fn combo_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)([A-Za-z0-9_]+)\s*\{([^{}]*?key-positions[^{}]*)\}").unwrap()
    })
}

fn int_property(body: &str, name: &str) -> Option<IntValue> {
    let re = Regex::new(&format!(r"{name}\s*=\s*<\s*(\d+)\s*>")).ok()?;
    re.captures(body)
        .and_then(|c| c[1].parse::<i64>().ok())
        .map(IntValue::Int)
}

fn text_property(body: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"{name}\s*=\s*"([^"]*)""#)).ok()?;
    re.captures(body).map(|c| c[1].to_string())
}

fn number_list(body: &str, name: &str) -> Vec<i64> {
    let Ok(re) = Regex::new(&format!(r"{name}\s*=\s*<([^>]*)>")) else {
        return Vec::new();
    };
    re.captures(body)
        .map(|c| {
            c[1].split_whitespace()
                .filter_map(|w| w.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts the interior of the `combos` node by brace counting; the node
/// nests further nodes, which a single pattern cannot bound correctly.
fn extract_combos_section(content: &str) -> Option<String> {
    let marker = content.find("\"zmk,combos\"")?;
    let open = content[..marker].rfind('{')?;
    let mut depth = 0usize;
    for (offset, c) in content[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[open + 1..open + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Tokenizes the inside of a `< ... >` list into cells.
fn tokenize_cells(text: &str) -> Vec<Cell> {
    text.split_whitespace()
        .map(|word| {
            word.parse::<i64>()
                .map_or_else(|_| Cell::Word(word.to_string()), Cell::Number)
        })
        .collect()
}

/// Regex-backend parse of the full keymap text.
pub fn parse(content: &str, keyboard: &str) -> Result<LayoutData> {
    let mut layout = LayoutData::new(keyboard, String::new());

    // The combos block must be masked out before the layer scan: a combo node
    // also carries a `bindings` property and would match the layer pattern.
    let combos_section = extract_combos_section(content);
    let masked = match &combos_section {
        Some(section) => content.replacen(section.as_str(), "", 1),
        None => content.to_string(),
    };

    for caps in layer_regex().captures_iter(&masked) {
        let node_name = &caps[1];
        let cells = tokenize_cells(&caps[2]);
        let bindings = super::cells_to_bindings(&cells, 0)?;
        let name = caps.get(3).map_or_else(
            || {
                node_name
                    .strip_prefix("layer_")
                    .unwrap_or(node_name)
                    .to_string()
            },
            |m| m.as_str().to_string(),
        );
        layout.layer_names.push(name);
        layout.layers.push(bindings);
    }

    if layout.layers.is_empty() {
        return Err(Error::ParseFailed {
            line: 0,
            message: "no layer bindings found".to_string(),
        });
    }

    for caps in hold_tap_regex().captures_iter(content) {
        let body = &caps[2];
        let bindings = Regex::new(r"bindings\s*=\s*([^;]+);")
            .expect("static regex")
            .captures(body)
            .map(|c| {
                c[1].split(',')
                    .filter_map(|group| {
                        group
                            .trim()
                            .trim_start_matches('<')
                            .trim_end_matches('>')
                            .split_whitespace()
                            .next()
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        layout.hold_taps.push(HoldTapBehavior {
            name: caps[1].to_string(),
            description: None,
            bindings,
            tapping_term_ms: int_property(body, "tapping-term-ms"),
            quick_tap_ms: int_property(body, "quick-tap-ms"),
            require_prior_idle_ms: int_property(body, "require-prior-idle-ms"),
            flavor: text_property(body, "flavor"),
            hold_trigger_key_positions: number_list(body, "hold-trigger-key-positions")
                .iter()
                .filter_map(|&n| u32::try_from(n).ok())
                .collect(),
            hold_trigger_on_release: body.contains("hold-trigger-on-release;"),
            retro_tap: body.contains("retro-tap;"),
        });
    }

    for caps in macro_regex().captures_iter(content) {
        let body = &caps[2];
        let mut bindings = Vec::new();
        if let Some(binding_caps) = Regex::new(r"bindings\s*=\s*([^;]+);")
            .expect("static regex")
            .captures(body)
        {
            for group in binding_caps[1].split(',') {
                let inner = group.trim().trim_start_matches('<').trim_end_matches('>');
                bindings.extend(super::cells_to_bindings(&tokenize_cells(inner), 0)?);
            }
        }
        layout.macros.push(MacroBehavior {
            name: caps[1].to_string(),
            description: None,
            wait_ms: int_property(body, "wait-ms"),
            tap_ms: int_property(body, "tap-ms"),
            bindings,
        });
    }

    if let Some(section) = combos_section {
        for caps in combo_regex().captures_iter(&section) {
            let body = &caps[2];
            let mut layers = Vec::new();
            for id in number_list(body, "layers") {
                let name = usize::try_from(id)
                    .ok()
                    .and_then(|i| layout.layer_names.get(i));
                match name {
                    Some(name) => layers.push(name.clone()),
                    None => {
                        return Err(Error::ParseFailed {
                            line: 0,
                            message: format!(
                                "combo '{}' references layer id {id} out of range",
                                &caps[1]
                            ),
                        });
                    }
                }
            }
            let binding_text = Regex::new(r"bindings\s*=\s*<([^>]*)>")
                .expect("static regex")
                .captures(body)
                .map(|c| c[1].to_string())
                .ok_or_else(|| Error::ParseFailed {
                    line: 0,
                    message: format!("combo '{}' has no binding", &caps[1]),
                })?;
            let mut bindings = super::cells_to_bindings(&tokenize_cells(&binding_text), 0)?;
            if bindings.is_empty() {
                return Err(Error::ParseFailed {
                    line: 0,
                    message: format!("combo '{}' has no binding", &caps[1]),
                });
            }
            layout.combos.push(ComboBehavior {
                name: caps[1].to_string(),
                description: None,
                timeout_ms: int_property(body, "timeout-ms"),
                key_positions: number_list(body, "key-positions")
                    .iter()
                    .filter_map(|&n| u32::try_from(n).ok())
                    .collect(),
                layers,
                binding: bindings.remove(0),
            });
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
/ {
    behaviors {
        hm: hm {
            compatible = "zmk,behavior-hold-tap";
            #binding-cells = <2>;
            tapping-term-ms = <280>;
            flavor = "balanced";
            bindings = <&kp>, <&kp>;
        };
    };

    combos {
        compatible = "zmk,combos";
        combo_esc {
            timeout-ms = <50>;
            key-positions = <0 1>;
            layers = <0>;
            bindings = <&kp ESC>;
        };
    };

    keymap {
        compatible = "zmk,keymap";

        layer_base {
            bindings = <
                &kp Q  &mt LSHIFT A
            >;
            display-name = "base";
        };
    };
};
"#;

    #[test]
    fn test_regex_backend_layers() {
        let layout = parse(SAMPLE, "test").unwrap();
        assert_eq!(layout.layer_names, vec!["base"]);
        assert_eq!(layout.layers[0].len(), 2);
        assert_eq!(layout.layers[0][1].to_dts(), "&mt LSHIFT A");
    }

    #[test]
    fn test_regex_backend_hold_taps() {
        let layout = parse(SAMPLE, "test").unwrap();
        assert_eq!(layout.hold_taps.len(), 1);
        let ht = &layout.hold_taps[0];
        assert_eq!(ht.name, "hm");
        assert_eq!(ht.tapping_term_ms, Some(IntValue::Int(280)));
        assert_eq!(ht.flavor.as_deref(), Some("balanced"));
        assert_eq!(ht.bindings, vec!["&kp", "&kp"]);
    }

    #[test]
    fn test_regex_backend_combos() {
        let layout = parse(SAMPLE, "test").unwrap();
        assert_eq!(layout.combos.len(), 1);
        let combo = &layout.combos[0];
        assert_eq!(combo.key_positions, vec![0, 1]);
        assert_eq!(combo.layers, vec!["base"]);
        assert_eq!(combo.binding.to_dts(), "&kp ESC");
    }

    #[test]
    fn test_regex_backend_agrees_with_ast() {
        let from_regex = parse(SAMPLE, "test").unwrap();
        let from_ast = crate::parser::parse_keymap(
            SAMPLE,
            None,
            crate::parser::ParseMode::Full,
            crate::parser::ParseBackend::Ast,
        )
        .unwrap();
        assert_eq!(from_regex.layer_names, from_ast.layer_names);
        assert_eq!(from_regex.layers, from_ast.layers);
        assert_eq!(from_regex.hold_taps, from_ast.hold_taps);
        assert_eq!(from_regex.combos, from_ast.combos);
    }

    #[test]
    fn test_regex_backend_no_layers_fails() {
        assert!(parse("/ { };", "test").is_err());
    }
}
