//! Keymap parsing: template-aware extraction, custom passage preservation,
//! and diagnostic quality.

mod fixtures;

use fixtures::*;
use glovebox::error::Error;
use glovebox::models::KeyboardConfig;
use glovebox::parser::{parse_keymap, ParseBackend, ParseMode};
use glovebox::profile::KeyboardProfile;
use std::sync::Arc;

const HANDWRITTEN_KEYMAP: &str = r#"
#include <behaviors.dtsi>
#include <dt-bindings/zmk/keys.h>
#define LAYER_base 0
#define LAYER_nav 1

/ {
    chosen {
        zmk,matrix_transform = <4>;
    };

    behaviors {
        hm: hm {
            compatible = "zmk,behavior-hold-tap";
            #binding-cells = <2>;
            tapping-term-ms = <280>;
            flavor = "balanced";
            bindings = <&kp>, <&kp>;
        };
    };

    macros {
        greet: greet {
            compatible = "zmk,behavior-macro";
            #binding-cells = <0>;
            wait-ms = <40>;
            bindings = <&kp H>, <&kp I>;
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
                &kp Q  &hm LCTRL A
            >;
            display-name = "base";
        };

        layer_nav {
            bindings = <
                &trans  &kp LC(LEFT)
            >;
            display-name = "nav";
        };
    };
};

&trackball_listener {
    scroll {
        layers = <1>;
        input-processors = <&zip_xy_scaler 2 1>;
    };
};
"#;

#[test]
fn full_parse_recovers_every_collection() {
    let layout = parse_keymap(
        HANDWRITTEN_KEYMAP,
        None,
        ParseMode::Full,
        ParseBackend::Ast,
    )
    .unwrap();

    assert_eq!(layout.layer_names, vec!["base", "nav"]);
    assert_eq!(layout.layers[0][1].to_dts(), "&hm LCTRL A");
    assert_eq!(layout.layers[1][1].to_dts(), "&kp LC(LEFT)");

    assert_eq!(layout.hold_taps.len(), 1);
    assert_eq!(layout.hold_taps[0].name, "hm");

    assert_eq!(layout.macros.len(), 1);
    assert_eq!(layout.macros[0].bindings.len(), 2);

    assert_eq!(layout.combos.len(), 1);
    assert_eq!(layout.combos[0].layers, vec!["base"]);

    assert_eq!(layout.input_listeners.len(), 1);
    assert_eq!(layout.input_listeners[0].code, "&trackball_listener");
    assert_eq!(layout.input_listeners[0].nodes[0].layers, vec![1]);
}

#[test]
fn full_parse_preserves_unknown_nodes_as_custom_devicetree() {
    let layout = parse_keymap(
        HANDWRITTEN_KEYMAP,
        None,
        ParseMode::Full,
        ParseBackend::Ast,
    )
    .unwrap();

    assert!(layout.custom_devicetree.contains("chosen {"));
    assert!(layout
        .custom_devicetree
        .contains("zmk,matrix_transform = <4>;"));
    // Structured collections never leak into the custom block.
    assert!(!layout.custom_devicetree.contains("zmk,keymap"));
    assert!(!layout.custom_devicetree.contains("combo_esc"));
}

#[test]
fn template_mode_drops_template_provided_nodes() {
    // A keyboard whose template contributes the `chosen` node: parsing a
    // generated keymap must not claim that node as user data.
    let mut config: KeyboardConfig = serde_yml::from_str(TEST_KEYBOARD_YAML).unwrap();
    config.keymap.keymap_dtsi =
        Some("/ { chosen { }; };\n{{ keymap_node }}".to_string());
    let profile = KeyboardProfile::new(Arc::new(config), Some("default")).unwrap();

    let layout = parse_keymap(
        HANDWRITTEN_KEYMAP,
        Some(&profile),
        ParseMode::Template,
        ParseBackend::Ast,
    )
    .unwrap();

    assert!(layout.custom_devicetree.is_empty());
}

#[test]
fn auto_mode_picks_template_when_profile_has_one() {
    let profile = test_profile();
    // The test profile template is trivial, so template and full agree on
    // collections either way; this exercises the selection path.
    let layout = parse_keymap(
        HANDWRITTEN_KEYMAP,
        Some(&profile),
        ParseMode::Auto,
        ParseBackend::Ast,
    )
    .unwrap();
    assert_eq!(layout.keyboard, "test");
    assert_eq!(layout.layer_names.len(), 2);
}

#[test]
fn parse_error_carries_line_number() {
    let broken = "/ {\n    keymap {\n        oops = ;\n    };\n};\n";
    let err = parse_keymap(broken, None, ParseMode::Full, ParseBackend::Ast).unwrap_err();
    match err {
        Error::ParseFailed { line, .. } => assert_eq!(line, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn keymap_without_layers_is_rejected() {
    let empty = r#"/ { keymap { compatible = "zmk,keymap"; }; };"#;
    let layout = parse_keymap(empty, None, ParseMode::Full, ParseBackend::Ast);
    // Zero layers violates the document invariants.
    assert!(layout.is_err());
}

#[test]
fn regex_backend_handles_handwritten_file() {
    let layout = parse_keymap(
        HANDWRITTEN_KEYMAP,
        None,
        ParseMode::Full,
        ParseBackend::Regex,
    )
    .unwrap();

    assert_eq!(layout.layer_names, vec!["base", "nav"]);
    assert_eq!(layout.hold_taps.len(), 1);
    assert_eq!(layout.combos.len(), 1);
    assert_eq!(layout.combos[0].key_positions, vec![0, 1]);
}
