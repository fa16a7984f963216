//! Variable preservation and flattening across load/save boundaries.
//!
//! Edit mode must round-trip `${...}` references untouched; flattening must
//! resolve them with types preserved and strip the variables map.

mod fixtures;

use fixtures::*;
use glovebox::models::{HoldTapBehavior, IntValue, LayoutData};
use serde_json::json;
use tempfile::TempDir;

fn layout_with_variables() -> LayoutData {
    let mut layout = minimal_layout();
    layout.variables.insert(
        "timeouts".to_string(),
        json!({"tap": 280, "combo": 50, "chain": "${timeouts.tap}"}),
    );
    layout
        .variables
        .insert("home_mods".to_string(), json!(["LGUI", "LALT"]));
    layout.hold_taps.push(HoldTapBehavior {
        name: "hm".to_string(),
        description: Some("Timeout: ${timeouts.tap}ms".to_string()),
        bindings: vec!["&kp".to_string(), "&kp".to_string()],
        tapping_term_ms: Some(IntValue::Var("${timeouts.tap}".to_string())),
        quick_tap_ms: Some(IntValue::Var("${timeouts.chain}".to_string())),
        require_prior_idle_ms: None,
        flavor: Some("${flavor:balanced}".to_string()),
        hold_trigger_key_positions: Vec::new(),
        hold_trigger_on_release: false,
        retro_tap: false,
    });
    layout
}

#[test]
fn edit_mode_round_trip_preserves_references() {
    let dir = TempDir::new().unwrap();
    let layout = layout_with_variables();
    let path = write_layout(dir.path(), "vars", &layout);

    // Load back without flattening: every reference survives verbatim.
    let reloaded = LayoutData::load(&path).unwrap();
    assert_eq!(reloaded, layout);
    assert_eq!(
        reloaded.hold_taps[0].tapping_term_ms,
        Some(IntValue::Var("${timeouts.tap}".to_string()))
    );
    assert_eq!(
        reloaded.variables["timeouts"]["chain"],
        json!("${timeouts.tap}")
    );
}

#[test]
fn save_does_not_resolve_references() {
    let dir = TempDir::new().unwrap();
    let layout = layout_with_variables();
    let path = write_layout(dir.path(), "vars", &layout);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("${timeouts.tap}"));
    assert!(raw.contains("\"variables\""));
}

#[test]
fn flatten_resolves_subkeys_chains_and_defaults() {
    let layout = layout_with_variables();
    let flattened = layout.to_flattened().unwrap();

    assert!(flattened.variables.is_empty());
    let ht = &flattened.hold_taps[0];
    assert_eq!(ht.tapping_term_ms, Some(IntValue::Int(280)));
    // Chain through the variables map resolves to the same integer.
    assert_eq!(ht.quick_tap_ms, Some(IntValue::Int(280)));
    // Undefined with default takes the default literally.
    assert_eq!(ht.flavor.as_deref(), Some("balanced"));
    // Interpolation inside a larger string stringifies naturally.
    assert_eq!(ht.description.as_deref(), Some("Timeout: 280ms"));
}

#[test]
fn flatten_is_idempotent() {
    let layout = layout_with_variables();
    let once = layout.to_flattened().unwrap();
    let twice = once.to_flattened().unwrap();
    assert_eq!(once, twice);
}

#[test]
fn flatten_keeps_original_untouched() {
    let layout = layout_with_variables();
    let _ = layout.to_flattened().unwrap();
    // The source document still carries its references after flattening.
    assert_eq!(
        layout.hold_taps[0].tapping_term_ms,
        Some(IntValue::Var("${timeouts.tap}".to_string()))
    );
    assert!(!layout.variables.is_empty());
}

#[test]
fn array_variable_usable_whole_but_not_interpolated() {
    let mut layout = minimal_layout();
    layout
        .variables
        .insert("mods".to_string(), json!(["LGUI", "LALT"]));
    layout.notes = Some("${mods}ms".to_string());

    let err = layout.to_flattened().unwrap_err();
    assert_eq!(err.kind(), "layout_invalid");

    layout.notes = None;
    layout.tags = vec!["${mods[1]}".to_string()];
    let flattened = layout.to_flattened().unwrap();
    assert_eq!(flattened.tags, vec!["LALT"]);
}

#[test]
fn cycle_error_reports_full_chain() {
    let mut layout = minimal_layout();
    layout.variables.insert("a".to_string(), json!("${b}"));
    layout.variables.insert("b".to_string(), json!("${c}"));
    layout.variables.insert("c".to_string(), json!("${a}"));
    layout.notes = Some("${a}".to_string());

    let err = layout.to_flattened().unwrap_err();
    assert_eq!(err.kind(), "variable_cycle");
    let message = err.to_string();
    for name in ["a", "b", "c"] {
        assert!(message.contains(name), "missing {name} in: {message}");
    }
}
