//! Device Tree fragment generation from a resolved layout.
//!
//! Every generator here consumes a flattened document (no `${...}` left) and
//! emits text the keymap template splices into the final `.keymap`. Empty
//! collections emit empty strings so the template never renders stray braces.

use crate::error::{Error, Result};
use crate::models::{
    ComboBehavior, HoldTapBehavior, InputListener, IntValue, LayerBindings, MacroBehavior,
};
use crate::profile::KeyboardProfile;

/// Turns a layer name into a C identifier for `#define` lines.
fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Numbered `#define LAYER_<name> <index>` lines in layer order.
#[must_use]
pub fn generate_layer_defines(layer_names: &[String]) -> String {
    layer_names
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("#define LAYER_{} {idx}", sanitize_identifier(name)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn optional_int(out: &mut String, indent: &str, property: &str, value: &Option<IntValue>) -> Result<()> {
    if let Some(value) = value {
        let resolved = value.resolved()?;
        out.push_str(&format!("{indent}{property} = <{resolved}>;\n"));
    }
    Ok(())
}

/// The `keymap` node enumerating each layer's binding sequence.
///
/// Row structure and spacing honor the profile's formatting rules; without a
/// physical grid, bindings wrap ten to a row.
pub fn generate_keymap_node(
    profile: &KeyboardProfile,
    layer_names: &[String],
    layers: &[LayerBindings],
) -> Result<String> {
    if layer_names.len() != layers.len() {
        return Err(Error::LayoutInvalid(format!(
            "layer count mismatch: {} names but {} layers",
            layer_names.len(),
            layers.len()
        )));
    }

    let formatting = &profile.keyboard_config.keymap.formatting;
    let indent = " ".repeat(formatting.base_indent);
    let gap = " ".repeat(formatting.key_gap);

    let mut out = String::new();
    out.push_str("keymap {\n    compatible = \"zmk,keymap\";\n");

    for (name, bindings) in layer_names.iter().zip(layers) {
        let cells: Vec<String> = bindings
            .iter()
            .map(crate::models::LayoutBinding::to_dts)
            .collect();
        let width = cells.iter().map(String::len).max().unwrap_or(0);

        out.push_str(&format!("\n    layer_{} {{\n", sanitize_identifier(name)));
        out.push_str("        bindings = <\n");

        let rows: Vec<Vec<usize>> = match &formatting.rows {
            Some(grid) => grid
                .iter()
                .map(|row| row.iter().map(|&p| p as usize).collect())
                .collect(),
            None => (0..cells.len())
                .collect::<Vec<_>>()
                .chunks(10)
                .map(<[usize]>::to_vec)
                .collect(),
        };

        for row in rows {
            let mut line = indent.clone();
            let mut first = true;
            for position in row {
                let Some(cell) = cells.get(position) else {
                    continue;
                };
                if !first {
                    line.push_str(&gap);
                }
                first = false;
                line.push_str(&format!("{cell:width$}"));
            }
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                out.push_str(trimmed);
                out.push('\n');
            }
        }

        out.push_str("        >;\n");
        out.push_str(&format!("        display-name = \"{name}\";\n"));
        out.push_str("    };\n");
    }

    out.push_str("};");
    Ok(out)
}

/// One Device Tree node per hold-tap, wrapped in a `behaviors` block.
pub fn generate_behaviors_dtsi(hold_taps: &[HoldTapBehavior]) -> Result<String> {
    if hold_taps.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    out.push_str("/ {\n    behaviors {\n");
    for ht in hold_taps {
        if let Some(description) = &ht.description {
            for line in description.lines() {
                out.push_str(&format!("        // {line}\n"));
            }
        }
        out.push_str(&format!("        {0}: {0} {{\n", ht.name));
        out.push_str("            compatible = \"zmk,behavior-hold-tap\";\n");
        out.push_str("            #binding-cells = <2>;\n");
        optional_int(&mut out, "            ", "tapping-term-ms", &ht.tapping_term_ms)?;
        optional_int(&mut out, "            ", "quick-tap-ms", &ht.quick_tap_ms)?;
        optional_int(
            &mut out,
            "            ",
            "require-prior-idle-ms",
            &ht.require_prior_idle_ms,
        )?;
        if let Some(flavor) = &ht.flavor {
            out.push_str(&format!("            flavor = \"{flavor}\";\n"));
        }
        if !ht.hold_trigger_key_positions.is_empty() {
            let positions: Vec<String> = ht
                .hold_trigger_key_positions
                .iter()
                .map(u32::to_string)
                .collect();
            out.push_str(&format!(
                "            hold-trigger-key-positions = <{}>;\n",
                positions.join(" ")
            ));
        }
        if ht.hold_trigger_on_release {
            out.push_str("            hold-trigger-on-release;\n");
        }
        if ht.retro_tap {
            out.push_str("            retro-tap;\n");
        }
        if !ht.bindings.is_empty() {
            let refs: Vec<String> = ht.bindings.iter().map(|b| format!("<{b}>")).collect();
            out.push_str(&format!("            bindings = {};\n", refs.join(", ")));
        }
        out.push_str("        };\n");
    }
    out.push_str("    };\n};");
    Ok(out)
}

/// One node per combo; `layers` entries are resolved against `layer_names`.
pub fn generate_combos_dtsi(combos: &[ComboBehavior], layer_names: &[String]) -> Result<String> {
    if combos.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    out.push_str("/ {\n    combos {\n        compatible = \"zmk,combos\";\n");
    for combo in combos {
        out.push_str(&format!("\n        {} {{\n", sanitize_identifier(&combo.name)));
        optional_int(&mut out, "            ", "timeout-ms", &combo.timeout_ms)?;
        let positions: Vec<String> = combo.key_positions.iter().map(u32::to_string).collect();
        out.push_str(&format!(
            "            key-positions = <{}>;\n",
            positions.join(" ")
        ));
        if !combo.layers.is_empty() {
            let mut ids = Vec::new();
            for name in &combo.layers {
                let idx = layer_names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| {
                        Error::LayoutInvalid(format!(
                            "combo '{}' references unknown layer '{name}'",
                            combo.name
                        ))
                    })?;
                ids.push(idx.to_string());
            }
            out.push_str(&format!("            layers = <{}>;\n", ids.join(" ")));
        }
        out.push_str(&format!(
            "            bindings = <{}>;\n",
            combo.binding.to_dts()
        ));
        out.push_str("        };\n");
    }
    out.push_str("    };\n};");
    Ok(out)
}

/// One node per macro; binding sequences serialize recursively.
pub fn generate_macros_dtsi(macros: &[MacroBehavior]) -> Result<String> {
    if macros.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    out.push_str("/ {\n    macros {\n");
    for macro_def in macros {
        let name = sanitize_identifier(&macro_def.name);
        out.push_str(&format!("        {name}: {name} {{\n"));
        out.push_str("            compatible = \"zmk,behavior-macro\";\n");
        out.push_str("            #binding-cells = <0>;\n");
        optional_int(&mut out, "            ", "wait-ms", &macro_def.wait_ms)?;
        optional_int(&mut out, "            ", "tap-ms", &macro_def.tap_ms)?;
        if !macro_def.bindings.is_empty() {
            let cells: Vec<String> = macro_def
                .bindings
                .iter()
                .map(|b| format!("<{}>", b.to_dts()))
                .collect();
            out.push_str(&format!("            bindings = {};\n", cells.join(", ")));
        }
        out.push_str("        };\n");
    }
    out.push_str("    };\n};");
    Ok(out)
}

/// Nested node per listener and its processors.
pub fn generate_input_listeners_node(listeners: &[InputListener]) -> Result<String> {
    if listeners.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    for (idx, listener) in listeners.iter().enumerate() {
        if idx > 0 {
            out.push_str("\n\n");
        }
        out.push_str(&format!("{} {{\n", listener.code));
        for node in &listener.nodes {
            if let Some(description) = &node.description {
                out.push_str(&format!("    // {description}\n"));
            }
            out.push_str(&format!("    {} {{\n", sanitize_identifier(&node.code)));
            if !node.layers.is_empty() {
                let layers: Vec<String> = node.layers.iter().map(i64::to_string).collect();
                out.push_str(&format!("        layers = <{}>;\n", layers.join(" ")));
            }
            if !node.input_processors.is_empty() {
                let procs: Vec<String> = node
                    .input_processors
                    .iter()
                    .map(crate::models::LayoutBinding::to_dts)
                    .collect();
                out.push_str(&format!(
                    "        input-processors = <{}>;\n",
                    procs.join(" ")
                ));
            }
            out.push_str("    };\n");
        }
        out.push_str("};");
    }
    Ok(out)
}
